//! Dispatch loop
//!
//! Pulls raw messages off the transport channel and hands each one to the
//! [`IngestHandler`] on its own task. Messages are independent: no ordering
//! is kept between them and a failing (or panicking) message never stops
//! the loop.

use std::sync::Arc;

use relay_common::RawMessage;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::handler::IngestHandler;

/// Default cap on concurrently running handler tasks
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

pub struct Dispatcher {
    handler: Arc<IngestHandler>,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(handler: Arc<IngestHandler>, max_in_flight: usize) -> Self {
        Self {
            handler,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Run until `shutdown` is cancelled or the sending side of `rx` closes.
    ///
    /// On shutdown the channel is closed to new messages, but anything already
    /// buffered is still handled. Returns once every started task has finished.
    #[instrument(name = "dispatcher", skip_all, fields(table = %self.handler.table()))]
    pub async fn run(&self, mut rx: mpsc::Receiver<RawMessage>, shutdown: CancellationToken) {
        let mut in_flight = JoinSet::new();
        info!("dispatcher started");

        loop {
            // Reap finished tasks so the set only holds live ones
            while let Some(joined) = in_flight.try_join_next() {
                self.reap(joined);
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let raw = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!("shutdown requested");
                    break;
                }
                next = rx.recv() => match next {
                    Some(raw) => raw,
                    None => {
                        info!("transport channel closed");
                        break;
                    }
                },
            };

            self.spawn(&mut in_flight, permit, raw);
        }

        rx.close();
        let mut drained = 0usize;
        while let Some(raw) = rx.recv().await {
            while let Some(joined) = in_flight.try_join_next() {
                self.reap(joined);
            }
            let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
                break;
            };
            self.spawn(&mut in_flight, permit, raw);
            drained += 1;
        }
        if drained > 0 {
            info!(drained, "handling messages buffered at shutdown");
        }

        if !in_flight.is_empty() {
            info!(in_flight = in_flight.len(), "waiting for in-flight messages");
        }
        while let Some(joined) = in_flight.join_next().await {
            self.reap(joined);
        }

        info!("dispatcher stopped");
    }

    fn spawn(&self, in_flight: &mut JoinSet<()>, permit: OwnedSemaphorePermit, raw: RawMessage) {
        let handler = Arc::clone(&self.handler);
        in_flight.spawn(async move {
            let _permit = permit;
            handler.handle(&raw).await;
        });
    }

    fn reap(&self, joined: Result<(), tokio::task::JoinError>) {
        if let Err(e) = joined {
            // The handler never returns an error, so this is a panic or abort
            error!(error = %e, cause = "HandlerPanic", "message handler task failed");
            self.handler.counter().increment_invalid();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::counter::{CounterSnapshot, OutcomeCounter};
    use crate::error::StoreError;
    use crate::store::{ItemStore, MemoryStore};
    use async_trait::async_trait;
    use relay_common::AttributeMap;
    use std::time::Duration;

    const TABLE: &str = "race";

    fn dispatcher_with(
        store: Arc<dyn ItemStore>,
        max_in_flight: usize,
    ) -> (Dispatcher, Arc<OutcomeCounter>) {
        let counter = Arc::new(OutcomeCounter::new());
        let handler = Arc::new(IngestHandler::new(
            store,
            TABLE,
            Arc::clone(&counter),
            Duration::from_secs(5),
        ));
        (Dispatcher::new(handler, max_in_flight), counter)
    }

    fn valid(client: &str) -> RawMessage {
        RawMessage::new(
            "race/telemetry",
            format!(r#"{{"client_id": "{client}", "timestamp": 1}}"#).into_bytes(),
        )
    }

    #[tokio::test]
    async fn test_bad_message_does_not_stop_loop() {
        let store = Arc::new(MemoryStore::new());
        let (dispatcher, counter) = dispatcher_with(store.clone(), 4);
        let (tx, rx) = mpsc::channel(16);

        tx.send(valid("a")).await.unwrap();
        tx.send(RawMessage::new("race/telemetry", b"garbage".to_vec())).await.unwrap();
        tx.send(valid("b")).await.unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(counter.snapshot(), CounterSnapshot { valid: 2, invalid: 1 });
        assert_eq!(store.items(TABLE).len(), 2);
    }

    /// Store that panics on any item carrying a `poison` attribute
    struct PanickingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl ItemStore for PanickingStore {
        async fn put_item(&self, table: &str, item: AttributeMap) -> Result<(), StoreError> {
            if item.contains_key("poison") {
                panic!("store client bug");
            }
            self.inner.put_item(table, item).await
        }
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let store = Arc::new(PanickingStore { inner: MemoryStore::new() });
        let (dispatcher, counter) = dispatcher_with(store.clone(), 2);
        let (tx, rx) = mpsc::channel(16);

        tx.send(RawMessage::new(
            "race/telemetry",
            br#"{"client_id": "x", "timestamp": 1, "poison": "yes"}"#.to_vec(),
        ))
        .await
        .unwrap();
        tx.send(valid("a")).await.unwrap();
        drop(tx);

        dispatcher.run(rx, CancellationToken::new()).await;

        assert_eq!(counter.snapshot(), CounterSnapshot { valid: 1, invalid: 1 });
        assert_eq!(store.inner.items(TABLE).len(), 1);
    }

    /// Store that takes a while per write
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl ItemStore for SlowStore {
        async fn put_item(&self, table: &str, item: AttributeMap) -> Result<(), StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put_item(table, item).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_in_flight_writes() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_secs(2),
        });
        let (dispatcher, counter) = dispatcher_with(store.clone(), 8);
        let (tx, rx) = mpsc::channel(16);
        let shutdown = CancellationToken::new();

        for client in ["a", "b", "c"] {
            tx.send(valid(client)).await.unwrap();
        }

        let run = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(rx, shutdown).await })
        };

        // Let the dispatcher pick up all three, then stop it mid-write
        tokio::time::sleep(Duration::from_millis(500)).await;
        shutdown.cancel();
        run.await.unwrap();

        assert_eq!(counter.snapshot(), CounterSnapshot { valid: 3, invalid: 0 });
        assert_eq!(store.inner.items(TABLE).len(), 3);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_is_bounded() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_secs(1),
        });
        let (dispatcher, counter) = dispatcher_with(store.clone(), 2);
        let (tx, rx) = mpsc::channel(16);

        for client in ["a", "b", "c", "d", "e"] {
            tx.send(valid(client)).await.unwrap();
        }
        drop(tx);

        let started = tokio::time::Instant::now();
        dispatcher.run(rx, CancellationToken::new()).await;

        // Five one-second writes, two at a time
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert_eq!(counter.snapshot().valid, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_buffered_messages_are_handled_on_shutdown() {
        let store = Arc::new(SlowStore {
            inner: MemoryStore::new(),
            delay: Duration::from_secs(1),
        });
        let (dispatcher, counter) = dispatcher_with(store.clone(), 1);
        let (tx, rx) = mpsc::channel(16);

        tx.send(valid("a")).await.unwrap();
        tx.send(RawMessage::new("race/telemetry", b"garbage".to_vec())).await.unwrap();
        tx.send(valid("b")).await.unwrap();
        tx.send(valid("c")).await.unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        dispatcher.run(rx, shutdown).await;

        assert_eq!(counter.snapshot(), CounterSnapshot { valid: 3, invalid: 1 });
        assert_eq!(store.inner.items(TABLE).len(), 3);

        // Intake is closed once shutdown begins
        assert!(tx.send(valid("d")).await.is_err());
    }
}
