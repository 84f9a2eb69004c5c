//! Concurrency properties of the connection registry.
//!
//! Many tasks upsert, touch, remove and evict at once on a multi-threaded
//! runtime.  Whatever the interleaving, afterwards:
//!
//! - every identifier appears at most once,
//! - `DeviceOnline` minus `DeviceOffline` equals the number of survivors,
//! - no identifier is ever offline more often than it was online.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devgate_core::RegistryEvent;
use devgate_server::{ClientSocket, ConnectionId, ConnectionRegistry, ManualClock};

struct StubSocket {
    endpoint: String,
    open: AtomicBool,
}

impl StubSocket {
    fn new(endpoint: &str) -> Arc<Self> {
        Arc::new(Self {
            endpoint: endpoint.to_string(),
            open: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl ClientSocket for StubSocket {
    fn remote_endpoint(&self) -> String {
        self.endpoint.clone()
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, _data: &[u8]) -> io::Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(io::ErrorKind::NotConnected.into())
        }
    }

    fn close(&self) -> io::Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_operations_keep_online_offline_balanced() {
    // Arrange
    let clock = Arc::new(ManualClock::new());
    let (registry, mut events) = ConnectionRegistry::<StubSocket>::new(1, clock.clone());
    let ids: Vec<String> = (0..16).map(|n| format!("10.9.0.{n}:4000")).collect();

    // Act
    let mut tasks = Vec::new();
    for worker in 0..8usize {
        let registry = Arc::clone(&registry);
        let ids = ids.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..200usize {
                let id = &ids[(worker * 7 + round) % ids.len()];
                match round % 5 {
                    0 | 1 => {
                        registry.upsert(&ConnectionId::from(id.as_str()), StubSocket::new(id));
                    }
                    2 => {
                        if let Some(record) = registry.record(id) {
                            registry.upsert(
                                &ConnectionId::from(id.as_str()),
                                Arc::clone(record.socket()),
                            );
                        }
                    }
                    3 => {
                        let _ = registry.remove_connection(id);
                    }
                    _ => {
                        let _ = registry.broadcast(b"tick").await;
                    }
                }
                tokio::task::yield_now().await;
            }
        }));
    }
    let sweeper = {
        let registry = Arc::clone(&registry);
        let clock = clock.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                clock.advance(Duration::from_secs(30));
                registry.evict_idle();
                tokio::task::yield_now().await;
            }
        })
    };
    for task in tasks {
        task.await.unwrap();
    }
    sweeper.await.unwrap();

    // Assert
    let survivors = registry.ids();
    let mut unique = survivors.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), survivors.len());
    assert_eq!(registry.count(), survivors.len());

    let mut balance: HashMap<ConnectionId, i64> = HashMap::new();
    while let Ok(event) = events.try_recv() {
        match event {
            RegistryEvent::DeviceOnline { client_id } => {
                *balance.entry(client_id).or_default() += 1;
            }
            RegistryEvent::DeviceOffline { client_id } => {
                let entry = balance.entry(client_id).or_default();
                *entry -= 1;
                assert!(*entry >= 0, "offline without matching online");
            }
            _ => {}
        }
    }
    let online_now: i64 = balance.values().sum();
    assert_eq!(online_now, survivors.len() as i64);
    for id in &survivors {
        assert_eq!(balance.get(id), Some(&1));
    }
}
