//! Payload serialization.
//!
//! Commands and responses cross the wire as MessagePack, encoded with
//! `to_vec_named` so structs travel as maps keyed by field name. That keeps
//! the encoding self-describing: the receiving side reconstructs the typed
//! value from the compile-time type alone, with no external schema.

use crate::error::Result;

/// MessagePack codec for command and response payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
