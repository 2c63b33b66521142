//! End-to-end duplex channel scenarios over loopback TCP.
//!
//! Every provider binds port 0 and the clients dial the assigned port, so
//! the tests can run in parallel.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crosswire::{
    ChannelClient, ChannelError, ChannelProvider, Handler, Identity, NullHandler, Worker,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn is_prime(candidate: u64) -> bool {
    if candidate < 2 {
        return false;
    }
    let mut divisor = 2;
    while divisor * divisor <= candidate {
        if candidate % divisor == 0 {
            return false;
        }
        divisor += 1;
    }
    true
}

struct PrimesHandler;

#[async_trait]
impl Handler<u64, bool> for PrimesHandler {
    async fn process(&self, _peer: Identity, candidate: u64) -> bool {
        is_prime(candidate)
    }
}

struct PlusOne;

#[async_trait]
impl Handler<i64, i64> for PlusOne {
    async fn process(&self, _peer: Identity, command: i64) -> i64 {
        command + 1
    }
}

/// Echoes after a fixed stall.
struct SlowEcho(Duration);

#[async_trait]
impl Handler<i64, i64> for SlowEcho {
    async fn process(&self, _peer: Identity, command: i64) -> i64 {
        tokio::time::sleep(self.0).await;
        command
    }
}

#[test]
fn duplex_prime_channel() {
    init_tracing();

    let provider: ChannelProvider<u64, bool, PrimesHandler> =
        ChannelProvider::builder(0, PrimesHandler).start().unwrap();
    let port = provider.local_addr().port();

    let client_id = 105280;
    let client = ChannelClient::<u64, bool>::builder(client_id, port)
        .handler(PrimesHandler)
        .connect()
        .unwrap();

    assert!(client.send(7).unwrap());
    assert!(!client.send(8).unwrap());

    assert!(!provider.send(client_id, 8).unwrap());
    assert!(provider.send(client_id, 11).unwrap());
}

#[test]
fn two_clients_attach_in_order_and_answer_independently() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let first = ChannelClient::<i64, i64>::builder(8, port)
        .handler(PlusOne)
        .connect()
        .unwrap();
    let second = ChannelClient::<i64, i64>::builder(18, port)
        .handler(PlusOne)
        .connect()
        .unwrap();

    assert_eq!(provider.attached_ids(), vec![8, 18]);

    assert_eq!(provider.send(8, 4).unwrap(), 5);
    assert_eq!(provider.send(18, 4).unwrap(), 5);

    assert_eq!(first.send(1).unwrap(), 2);
    assert_eq!(second.send(2).unwrap(), 3);
}

#[test]
fn duplex_symmetry_in_either_order_repeatedly() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let client = ChannelClient::<i64, i64>::builder(3, port)
        .handler(PlusOne)
        .connect()
        .unwrap();

    for n in 0..10 {
        assert_eq!(client.send(n).unwrap(), n + 1);
        assert_eq!(provider.send(3, n).unwrap(), n + 1);
    }
    for n in 0..10 {
        assert_eq!(provider.send(3, n).unwrap(), n + 1);
        assert_eq!(client.send(n).unwrap(), n + 1);
    }
}

#[test]
fn allow_list_gates_attach() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> = ChannelProvider::builder(0, PlusOne)
        .allow(42)
        .start()
        .unwrap();
    let port = provider.local_addr().port();

    let refused = ChannelClient::<i64, i64>::builder(7, port).connect();
    assert!(matches!(refused, Err(ChannelError::AttachRefused)));
    assert!(provider.attached_ids().is_empty());

    let granted = ChannelClient::<i64, i64>::builder(42, port).connect().unwrap();
    assert_eq!(provider.attached_ids(), vec![42]);
    assert_eq!(granted.send(1).unwrap(), 2);
}

#[test]
fn generated_allow_list_entry_can_attach() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> = ChannelProvider::builder(0, PlusOne)
        .allow(1)
        .start()
        .unwrap();
    let port = provider.local_addr().port();

    let minted = provider.generate_allow_list_entry();
    assert_ne!(minted, 0);

    let client = ChannelClient::<i64, i64>::builder(minted, port)
        .connect()
        .unwrap();
    assert_eq!(client.send(4).unwrap(), 5);
    assert_eq!(provider.attached_ids(), vec![minted]);
}

#[test]
fn second_attach_with_same_identity_is_refused() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let first = ChannelClient::<i64, i64>::builder(5, port).connect().unwrap();

    let duplicate = ChannelClient::<i64, i64>::builder(5, port).connect();
    assert!(matches!(duplicate, Err(ChannelError::AttachRefused)));

    // The original session is unaffected.
    assert_eq!(provider.attached_ids(), vec![5]);
    assert_eq!(first.send(1).unwrap(), 2);
}

#[test]
fn send_times_out_against_a_stalled_handler() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, SlowEcho> =
        ChannelProvider::builder(0, SlowEcho(Duration::from_millis(500)))
            .start()
            .unwrap();
    let port = provider.local_addr().port();

    let client = ChannelClient::<i64, i64>::builder(9, port)
        .timeout(Duration::from_millis(100))
        .connect()
        .unwrap();

    let started = Instant::now();
    let result = client.send(1);
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ChannelError::Timeout { .. })));
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(400), "took {:?}", elapsed);
}

#[test]
fn closing_a_client_detaches_it_from_the_provider() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let client = ChannelClient::<i64, i64>::builder(31, port).connect().unwrap();
    assert_eq!(provider.attached_ids(), vec![31]);

    drop(client);

    let deadline = Instant::now() + Duration::from_secs(2);
    while !provider.attached_ids().is_empty() {
        assert!(Instant::now() < deadline, "client was never detached");
        std::thread::sleep(Duration::from_millis(10));
    }

    let result = provider.send(31, 1);
    assert!(matches!(result, Err(ChannelError::UnknownClient(31))));
}

#[test]
fn send_to_unknown_client_fails_immediately() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();

    let result = provider.send(99, 1);
    assert!(matches!(result, Err(ChannelError::UnknownClient(99))));
}

#[test]
fn concurrent_clients_each_get_their_own_responses() {
    init_tracing();

    let provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let mut threads = Vec::new();
    for base in 0..4i64 {
        threads.push(std::thread::spawn(move || {
            let client = ChannelClient::<i64, i64>::builder(100 + base as u64, port)
                .connect()
                .unwrap();
            for n in 0..50 {
                let value = base * 1000 + n;
                assert_eq!(client.send(value).unwrap(), value + 1);
            }
        }));
    }
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn close_is_idempotent_on_both_facades() {
    init_tracing();

    let mut provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    let port = provider.local_addr().port();

    let mut client = ChannelClient::<i64, i64>::builder(6, port).connect().unwrap();

    client.close();
    client.close();
    drop(client);

    provider.close();
    provider.close();
    drop(provider);
}

#[test]
fn provider_close_with_no_attached_clients_is_safe() {
    init_tracing();

    let mut provider: ChannelProvider<i64, i64, PlusOne> =
        ChannelProvider::builder(0, PlusOne).start().unwrap();
    provider.close();
}

// ---------------------------------------------------------------------------
// Greeting protocol: provider-initiated calls against a client-side handler.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Greeting {
    Hello,
    Question(String),
    Goodbye,
}

struct GreeterHandler;

#[async_trait]
impl Handler<Greeting, String> for GreeterHandler {
    async fn process(&self, peer: Identity, command: Greeting) -> String {
        match command {
            Greeting::Hello => "Hello Pooh".to_string(),
            Greeting::Question(topic) => match topic.as_str() {
                "name" => "Eeyore".to_string(),
                "client_id" => peer.to_string(),
                _ => "oh bother".to_string(),
            },
            Greeting::Goodbye => "Bye now".to_string(),
        }
    }
}

#[test]
fn greeting_protocol_over_provider_initiated_calls() {
    init_tracing();

    let provider: ChannelProvider<Greeting, String, NullHandler> =
        ChannelProvider::builder(0, NullHandler).start().unwrap();
    let port = provider.local_addr().port();

    let _client = ChannelClient::<Greeting, String>::builder(42, port)
        .handler(GreeterHandler)
        .connect()
        .unwrap();

    assert_eq!(provider.send(42, Greeting::Hello).unwrap(), "Hello Pooh");
    assert_eq!(
        provider
            .send(42, Greeting::Question("name".to_string()))
            .unwrap(),
        "Eeyore"
    );
    assert_eq!(
        provider
            .send(42, Greeting::Question("client_id".to_string()))
            .unwrap(),
        "42"
    );
    assert_eq!(provider.send(42, Greeting::Goodbye).unwrap(), "Bye now");
}

// ---------------------------------------------------------------------------
// Worker-driven load: many independent calls fanned through one worker.
// ---------------------------------------------------------------------------

struct PrimeProbe {
    candidate: u64,
    provider: Arc<ChannelProvider<u64, bool, PrimesHandler>>,
    client_id: Identity,
    primes: Arc<Mutex<Vec<u64>>>,
}

impl crosswire::WorkItem for PrimeProbe {
    fn process(self) {
        if self.provider.send(self.client_id, self.candidate).unwrap() {
            self.primes.lock().unwrap().push(self.candidate);
        }
    }
}

#[test]
fn worker_driven_prime_sweep() {
    init_tracing();

    let provider: ChannelProvider<u64, bool, PrimesHandler> =
        ChannelProvider::builder(0, PrimesHandler).start().unwrap();
    let port = provider.local_addr().port();
    let provider = Arc::new(provider);

    let client_id = 105289;
    let _client = ChannelClient::<u64, bool>::builder(client_id, port)
        .handler(PrimesHandler)
        .connect()
        .unwrap();

    let primes = Arc::new(Mutex::new(Vec::new()));
    let mut worker = Worker::new();

    for candidate in 1..1000 {
        worker
            .push(PrimeProbe {
                candidate,
                provider: Arc::clone(&provider),
                client_id,
                primes: Arc::clone(&primes),
            })
            .unwrap();
    }

    worker.shutdown(true);

    let mut found = primes.lock().unwrap().clone();
    found.sort_unstable();

    assert_eq!(found.len(), 168);
    assert_eq!(found[0], 2);
    assert_eq!(found[1], 3);
    assert_eq!(found[2], 5);
    assert_eq!(found[3], 7);
    assert_eq!(found[24], 97);
    assert_eq!(*found.last().unwrap(), 997);
}
