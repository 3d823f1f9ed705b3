//! Optimistic writes reconciled with the server.
//!
//! A caller submits the value it wants to show immediately. Per key there is at
//! most one write in flight; values submitted meanwhile collapse into a single
//! pending value, the newest one. When a write lands, the server's answer
//! replaces whatever the caller assumed. Throttled writes are retried with
//! exponential backoff using the newest pending value.

use super::{ApiClient, ClientError};
use crate::api::models::users::UserUpdate;
use async_trait::async_trait;
use serde_json::Value;
use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::Arc,
    time::Duration,
};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Destination of queued writes. Returns the value the server settled on.
#[async_trait]
pub trait Writer: Send + Sync + 'static {
    type Key: Eq + Hash + Clone + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;

    async fn write(&self, key: &Self::Key, value: Self::Value) -> Result<Self::Value, ClientError>;
}

#[derive(Debug)]
struct Slot<V> {
    /// What the caller should display right now
    shown: V,
    /// Last value the server acknowledged
    confirmed: Option<V>,
    pending: Option<V>,
    in_flight: bool,
    last_error: Option<String>,
}

struct Inner<W: Writer> {
    writer: W,
    slots: Mutex<HashMap<W::Key, Slot<W::Value>>>,
    changes: watch::Sender<u64>,
    initial_backoff: Duration,
    max_backoff: Duration,
}

pub struct WriteQueue<W: Writer> {
    inner: Arc<Inner<W>>,
}

impl<W: Writer> Clone for WriteQueue<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: Writer> WriteQueue<W> {
    pub fn new(writer: W) -> Self {
        Self::with_backoff(writer, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
    }

    pub fn with_backoff(writer: W, initial_backoff: Duration, max_backoff: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                writer,
                slots: Mutex::new(HashMap::new()),
                changes,
                initial_backoff,
                max_backoff: max_backoff.max(initial_backoff),
            }),
        }
    }

    /// Show `value` immediately and schedule it to be written. Must be called
    /// from within a tokio runtime.
    pub async fn submit(&self, key: W::Key, value: W::Value) {
        let start = {
            let mut slots = self.inner.slots.lock().await;
            match slots.get_mut(&key) {
                Some(slot) if slot.in_flight => {
                    slot.shown = value;
                    slot.pending = Some(slot.shown.clone());
                    None
                }
                Some(slot) => {
                    slot.shown = value.clone();
                    slot.in_flight = true;
                    slot.last_error = None;
                    Some(value)
                }
                None => {
                    slots.insert(
                        key.clone(),
                        Slot {
                            shown: value.clone(),
                            confirmed: None,
                            pending: None,
                            in_flight: true,
                            last_error: None,
                        },
                    );
                    Some(value)
                }
            }
        };
        self.inner.changes.send_modify(|generation| *generation += 1);

        if let Some(value) = start {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.drain(key, value).await });
        }
    }

    /// The value to display for `key`
    pub async fn current(&self, key: &W::Key) -> Option<W::Value> {
        self.inner.slots.lock().await.get(key).map(|slot| slot.shown.clone())
    }

    pub async fn confirmed(&self, key: &W::Key) -> Option<W::Value> {
        self.inner.slots.lock().await.get(key).and_then(|slot| slot.confirmed.clone())
    }

    /// Error from the last write for `key` that was given up on
    pub async fn last_error(&self, key: &W::Key) -> Option<String> {
        self.inner.slots.lock().await.get(key).and_then(|slot| slot.last_error.clone())
    }

    /// Wait until nothing is in flight or pending for `key`, then return the displayed value
    pub async fn settled(&self, key: &W::Key) -> Option<W::Value> {
        let mut changes = self.inner.changes.subscribe();
        loop {
            {
                let slots = self.inner.slots.lock().await;
                match slots.get(key) {
                    None => return None,
                    Some(slot) if !slot.in_flight => return Some(slot.shown.clone()),
                    Some(_) => {}
                }
            }
            if changes.changed().await.is_err() {
                return self.current(key).await;
            }
        }
    }
}

impl<W: Writer> Inner<W> {
    async fn drain(&self, key: W::Key, mut value: W::Value) {
        let mut backoff = self.initial_backoff;

        loop {
            let result = self.writer.write(&key, value.clone()).await;

            let (next, throttled) = {
                let mut slots = self.slots.lock().await;
                let Some(slot) = slots.get_mut(&key) else {
                    return;
                };

                match result {
                    Ok(server_value) => {
                        slot.confirmed = Some(server_value.clone());
                        slot.last_error = None;
                        let next = slot.pending.take();
                        if next.is_none() {
                            // Server wins once nothing newer is queued
                            slot.shown = server_value;
                            slot.in_flight = false;
                        }
                        (next, false)
                    }
                    Err(ClientError::Throttled { message }) => {
                        debug!("Write for {:?} throttled ({}), retrying in {:?}", key, message, backoff);
                        (Some(slot.pending.take().unwrap_or(value)), true)
                    }
                    Err(e) => {
                        warn!("Write for {:?} failed: {}", key, e);
                        slot.last_error = Some(e.to_string());
                        let next = slot.pending.take();
                        if next.is_none() {
                            // Roll the display back to what the server last acknowledged
                            if let Some(confirmed) = slot.confirmed.clone() {
                                slot.shown = confirmed;
                            }
                            slot.in_flight = false;
                        }
                        (next, false)
                    }
                }
            };
            self.changes.send_modify(|generation| *generation += 1);

            let Some(next) = next else {
                return;
            };
            if throttled {
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(self.max_backoff);
            } else {
                backoff = self.initial_backoff;
            }
            value = next;
        }
    }
}

/// Writes single profile fields (keyed by their JSON name, e.g. `imagesGenerated`)
/// through `PATCH /users/updateMe`.
pub struct ProfileWriter {
    client: ApiClient,
}

impl ProfileWriter {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Writer for ProfileWriter {
    type Key = String;
    type Value = Value;

    async fn write(&self, field: &String, value: Value) -> Result<Value, ClientError> {
        let mut body = serde_json::Map::new();
        body.insert(field.clone(), value);
        let update: UserUpdate = serde_json::from_value(Value::Object(body))?;

        let user = self.client.update_me(&update).await?;
        let user = serde_json::to_value(user)?;
        Ok(user.get(field).cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::spawn_server;
    use crate::test_utils::create_test_config;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Records every write; each write waits for a permit so tests control when it lands
    struct ScriptedWriter {
        gate: Arc<Semaphore>,
        writes: Arc<std::sync::Mutex<Vec<i64>>>,
        throttle_first: AtomicUsize,
        fail_value: Option<i64>,
        /// The server clamps values to this ceiling
        ceiling: i64,
    }

    impl ScriptedWriter {
        fn new(gate: Arc<Semaphore>) -> Self {
            Self {
                gate,
                writes: Arc::new(std::sync::Mutex::new(Vec::new())),
                throttle_first: AtomicUsize::new(0),
                fail_value: None,
                ceiling: i64::MAX,
            }
        }
    }

    #[async_trait]
    impl Writer for ScriptedWriter {
        type Key = &'static str;
        type Value = i64;

        async fn write(&self, _key: &&'static str, value: i64) -> Result<i64, ClientError> {
            self.gate.acquire().await.unwrap().forget();
            self.writes.lock().unwrap().push(value);

            if self
                .throttle_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ClientError::Throttled {
                    message: "slow down".to_string(),
                });
            }
            if self.fail_value == Some(value) {
                return Err(ClientError::Api {
                    status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    message: "boom".to_string(),
                });
            }
            Ok(value.min(self.ceiling))
        }
    }

    fn queue(writer: ScriptedWriter) -> WriteQueue<ScriptedWriter> {
        WriteQueue::with_backoff(writer, Duration::from_millis(5), Duration::from_millis(20))
    }

    #[test_log::test(tokio::test)]
    async fn pending_values_coalesce_behind_the_in_flight_write() {
        let gate = Arc::new(Semaphore::new(0));
        let writer = ScriptedWriter::new(gate.clone());
        let writes = writer.writes.clone();
        let queue = queue(writer);

        queue.submit("count", 1).await;
        queue.submit("count", 2).await;
        queue.submit("count", 3).await;
        assert_eq!(queue.current(&"count").await, Some(3));

        gate.add_permits(10);
        assert_eq!(queue.settled(&"count").await, Some(3));
        assert_eq!(*writes.lock().unwrap(), vec![1, 3]);
        assert_eq!(queue.confirmed(&"count").await, Some(3));
    }

    #[test_log::test(tokio::test)]
    async fn server_value_replaces_the_optimistic_one() {
        let gate = Arc::new(Semaphore::new(10));
        let mut writer = ScriptedWriter::new(gate);
        writer.ceiling = 100;
        let queue = queue(writer);

        queue.submit("count", 250).await;
        assert_eq!(queue.settled(&"count").await, Some(100));
    }

    #[test_log::test(tokio::test)]
    async fn throttled_writes_retry_with_newest_value() {
        let gate = Arc::new(Semaphore::new(0));
        let writer = ScriptedWriter::new(gate.clone());
        writer.throttle_first.store(1, Ordering::SeqCst);
        let writes = writer.writes.clone();
        let queue = queue(writer);

        queue.submit("count", 1).await;
        queue.submit("count", 2).await;
        gate.add_permits(10);

        assert_eq!(queue.settled(&"count").await, Some(2));
        assert_eq!(*writes.lock().unwrap(), vec![1, 2]);
    }

    #[test_log::test(tokio::test)]
    async fn failed_write_rolls_back_to_confirmed_value() {
        let gate = Arc::new(Semaphore::new(10));
        let mut writer = ScriptedWriter::new(gate);
        writer.fail_value = Some(7);
        let queue = queue(writer);

        queue.submit("count", 5).await;
        assert_eq!(queue.settled(&"count").await, Some(5));

        queue.submit("count", 7).await;
        assert_eq!(queue.settled(&"count").await, Some(5));
        assert!(queue.last_error(&"count").await.unwrap().contains("boom"));
    }

    #[test_log::test(tokio::test)]
    async fn profile_counter_converges_on_the_server() {
        let mut config = create_test_config();
        config.auth.profile_update_throttle = Duration::from_millis(50);
        let base = spawn_server(config).await;

        let mut client = ApiClient::new(&base).unwrap();
        client.signup("counter@example.com", "password123", None).await.unwrap();
        let queue = WriteQueue::with_backoff(
            ProfileWriter::new(client.clone()),
            Duration::from_millis(50),
            Duration::from_millis(200),
        );

        let field = "imagesGenerated".to_string();
        for n in 1..=5 {
            queue.submit(field.clone(), json!(n)).await;
        }

        assert_eq!(queue.settled(&field).await, Some(json!(5)));
        assert_eq!(client.me().await.unwrap().images_generated, 5);
    }
}
