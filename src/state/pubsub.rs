use super::StateHandler;
use crate::config::PubSubConfig;
use crate::core::{DbError, Result};
use crate::definition::DefinitionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use uuid::Uuid;

/// One checksum change on the wire. `checksum: None` clears the entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMessage {
    pub sender: Uuid,
    pub definition: DefinitionId,
    pub checksum: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StateMessage {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// Live subscription to one channel.
#[async_trait]
pub trait Subscription: Send {
    /// Next payload. `Ok(None)` means the channel was closed for good, an
    /// error means the connection dropped and a new subscription is needed.
    async fn next(&mut self) -> Result<Option<String>>;
}

/// Broadcast transport between processes.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: String) -> Result<()>;
    /// Resolves once the subscription is live.
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>>;
}

/// In-process broker with fault injection, standing in for a network one.
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    connection: watch::Sender<u64>,
    failing_subscribes: AtomicUsize,
    failing_publishes: AtomicUsize,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (connection, _) = watch::channel(0);
        Self {
            channels: Mutex::new(HashMap::new()),
            connection,
            failing_subscribes: AtomicUsize::new(0),
            failing_publishes: AtomicUsize::new(0),
        }
    }

    fn sender(&self, channel: &str) -> Result<broadcast::Sender<String>> {
        let mut channels = self.channels.lock()?;
        Ok(channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone())
    }

    /// Drops every live subscription, as a broker restart would.
    pub fn disconnect_all(&self) {
        self.connection.send_modify(|generation| *generation += 1);
    }

    pub fn fail_next_subscribes(&self, count: usize) {
        self.failing_subscribes.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .map(|channels| channels.get(channel).map_or(0, |tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<()> {
        if Self::take_failure(&self.failing_publishes) {
            return Err(DbError::Propagation(format!("publish to '{}' failed", channel)));
        }
        // no subscribers is not an error
        let _ = self.sender(channel)?.send(payload);
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>> {
        if Self::take_failure(&self.failing_subscribes) {
            return Err(DbError::Propagation(format!("subscribe to '{}' refused", channel)));
        }
        Ok(Box::new(InMemorySubscription {
            messages: self.sender(channel)?.subscribe(),
            connection: self.connection.subscribe(),
        }))
    }
}

struct InMemorySubscription {
    messages: broadcast::Receiver<String>,
    connection: watch::Receiver<u64>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    async fn next(&mut self) -> Result<Option<String>> {
        loop {
            tokio::select! {
                received = self.messages.recv() => match received {
                    Ok(payload) => return Ok(Some(payload)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("state subscription lagged, {} messages skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(None),
                },
                _ = self.connection.changed() => {
                    return Err(DbError::Propagation("connection reset by broker".into()));
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    checksum: Option<String>,
    timestamp: DateTime<Utc>,
}

struct Shared {
    sender: Uuid,
    entries: Mutex<HashMap<DefinitionId, Entry>>,
    reconnects: AtomicU64,
}

impl Shared {
    /// Last writer wins: strictly older messages are dropped.
    fn apply(&self, message: StateMessage) -> Result<bool> {
        if message.sender == self.sender {
            return Ok(false);
        }
        let mut entries = self.entries.lock()?;
        if let Some(existing) = entries.get(&message.definition) {
            if message.timestamp < existing.timestamp {
                return Ok(false);
            }
        }
        entries.insert(
            message.definition,
            Entry {
                checksum: message.checksum,
                timestamp: message.timestamp,
            },
        );
        Ok(true)
    }

    fn record(&self, id: DefinitionId, checksum: Option<String>) -> Result<DateTime<Utc>> {
        let mut entries = self.entries.lock()?;
        let mut timestamp = Utc::now();
        // keep local writes monotonic even if a remote clock ran ahead
        if let Some(existing) = entries.get(&id) {
            if existing.timestamp > timestamp {
                timestamp = existing.timestamp;
            }
        }
        entries.insert(id, Entry { checksum, timestamp });
        Ok(timestamp)
    }
}

fn retry_backoff_ms(config: &PubSubConfig, attempt: u32) -> u64 {
    let base = config.retry_base_ms.max(1);
    let max = config.retry_max_ms.max(base);
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(max)
}

/// Local checksums mirrored to every process subscribed to the same channel.
pub struct PubSubStateHandler {
    shared: Arc<Shared>,
    broker: Arc<dyn Broker>,
    config: PubSubConfig,
    connected: watch::Receiver<bool>,
    listener: JoinHandle<()>,
}

impl PubSubStateHandler {
    /// Subscribes and waits until the subscription is live. Fails when that
    /// does not happen within `ready_timeout_ms`.
    pub async fn connect(broker: Arc<dyn Broker>, config: PubSubConfig) -> Result<Self> {
        let shared = Arc::new(Shared {
            sender: Uuid::new_v4(),
            entries: Mutex::new(HashMap::new()),
            reconnects: AtomicU64::new(0),
        });
        let (ready_tx, mut ready_rx) = watch::channel(false);
        let listener = tokio::spawn(listen(
            Arc::clone(&shared),
            Arc::clone(&broker),
            config.clone(),
            ready_tx,
        ));

        let ready_within = Duration::from_millis(config.ready_timeout_ms);
        let confirmed = matches!(
            timeout(ready_within, ready_rx.wait_for(|live| *live)).await,
            Ok(Ok(_))
        );
        if !confirmed {
            listener.abort();
            return Err(DbError::Propagation(format!(
                "subscription to '{}' not confirmed within {} ms",
                config.channel, config.ready_timeout_ms
            )));
        }
        info!("state channel '{}' ready", config.channel);

        Ok(Self {
            shared,
            broker,
            config,
            connected: ready_rx,
            listener,
        })
    }

    /// Identity stamped on outgoing messages.
    pub fn sender_id(&self) -> Uuid {
        self.shared.sender
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Successful resubscriptions after a dropped connection.
    pub fn reconnects(&self) -> u64 {
        self.shared.reconnects.load(Ordering::SeqCst)
    }

    async fn publish(&self, id: DefinitionId, checksum: Option<String>) -> Result<()> {
        let timestamp = self.shared.record(id, checksum.clone())?;
        let payload = StateMessage {
            sender: self.shared.sender,
            definition: id,
            checksum,
            timestamp,
        }
        .encode()?;

        let within = Duration::from_millis(self.config.socket_timeout_ms);
        match timeout(within, self.broker.publish(&self.config.channel, payload)).await {
            Ok(result) => result,
            Err(_) => Err(DbError::Propagation(format!(
                "publish to '{}' timed out after {} ms",
                self.config.channel, self.config.socket_timeout_ms
            ))),
        }
    }
}

impl Drop for PubSubStateHandler {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn listen(
    shared: Arc<Shared>,
    broker: Arc<dyn Broker>,
    config: PubSubConfig,
    ready: watch::Sender<bool>,
) {
    let socket_timeout = Duration::from_millis(config.socket_timeout_ms);
    let mut attempt: u32 = 0;
    let mut subscribed_before = false;

    loop {
        let mut subscription = match timeout(socket_timeout, broker.subscribe(&config.channel)).await {
            Ok(Ok(subscription)) => subscription,
            Ok(Err(err)) => {
                attempt = attempt.saturating_add(1);
                let delay = retry_backoff_ms(&config, attempt);
                warn!(
                    "state subscribe failed: channel='{}' attempt={} retry_in_ms={} error='{}'",
                    config.channel, attempt, delay, err
                );
                sleep(Duration::from_millis(delay)).await;
                continue;
            }
            Err(_) => {
                attempt = attempt.saturating_add(1);
                let delay = retry_backoff_ms(&config, attempt);
                warn!(
                    "state subscribe timed out: channel='{}' attempt={} retry_in_ms={}",
                    config.channel, attempt, delay
                );
                sleep(Duration::from_millis(delay)).await;
                continue;
            }
        };

        if subscribed_before {
            shared.reconnects.fetch_add(1, Ordering::SeqCst);
            info!("state channel '{}' resumed after {} attempts", config.channel, attempt);
        }
        subscribed_before = true;
        attempt = 0;
        let _ = ready.send(true);

        loop {
            match subscription.next().await {
                Ok(Some(payload)) => {
                    let applied = StateMessage::decode(&payload).and_then(|m| shared.apply(m));
                    if let Err(err) = applied {
                        warn!("state message dropped: channel='{}' error='{}'", config.channel, err);
                    }
                }
                Ok(None) => {
                    warn!("state channel '{}' closed", config.channel);
                    break;
                }
                Err(err) => {
                    warn!("state channel '{}' disconnected: {}", config.channel, err);
                    break;
                }
            }
        }

        let _ = ready.send(false);
        attempt = attempt.saturating_add(1);
        sleep(Duration::from_millis(retry_backoff_ms(&config, attempt))).await;
    }
}

#[async_trait]
impl StateHandler for PubSubStateHandler {
    async fn get_checksum(&self, id: DefinitionId) -> Result<Option<String>> {
        Ok(self
            .shared
            .entries
            .lock()?
            .get(&id)
            .and_then(|entry| entry.checksum.clone()))
    }

    async fn set_checksum(&self, id: DefinitionId, checksum: &str) -> Result<()> {
        self.publish(id, Some(checksum.to_string())).await
    }

    async fn clear_checksum(&self, id: DefinitionId) -> Result<()> {
        self.publish(id, None).await
    }

    fn backend(&self) -> &'static str {
        "pubsub"
    }
}
