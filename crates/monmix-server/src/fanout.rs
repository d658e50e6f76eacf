/// Telemetry fan-out to UI subscribers.
///
/// Each connected UI session holds one subscriber channel. Telemetry from
/// the console client is merged into a latest-levels map and pushed to every
/// live subscriber; connection changes and watchdog progress are pushed as
/// `connection` messages carrying the watchdog snapshot. A poll loop asks
/// for VU levels while connected, for consoles that never push them, and a
/// liveness loop prunes subscribers that stopped answering.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use monmix_protocol::status::WatchdogStatus;
use monmix_protocol::{ChannelClass, TelemetryReading};

use crate::client::{ClientEvent, ConsoleClient};
use crate::unix_ms;
use crate::watchdog::{Watchdog, WatchdogEvent};

/// Messages queued per subscriber before it counts as slow
const SUBSCRIBER_BUFFER: usize = 64;

/// Outbound message, serialized once and shared by all subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FanoutMessage {
    /// Full latest-levels map, sent when a subscriber joins
    Snapshot {
        readings: Vec<TelemetryReading>,
        connected: bool,
        watchdog: WatchdogStatus,
    },
    Telemetry {
        timestamp_ms: u64,
        readings: Vec<TelemetryReading>,
    },
    Connection {
        timestamp_ms: u64,
        event: String,
        connected: bool,
        watchdog: WatchdogStatus,
    },
}

struct Subscriber {
    tx: mpsc::Sender<Arc<str>>,
    last_seen: Instant,
}

/// A subscriber's end of the fan-out.
pub struct Subscription {
    pub id: u64,
    pub rx: mpsc::Receiver<Arc<str>>,
}

pub struct Fanout {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    latest: Mutex<BTreeMap<(ChannelClass, u16), TelemetryReading>>,
    next_id: AtomicU64,
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            latest: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, Subscriber>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn latest(&self) -> MutexGuard<'_, BTreeMap<(ChannelClass, u16), TelemetryReading>> {
        match self.latest.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Register a subscriber. The first message it receives is `greeting`.
    pub fn subscribe(&self, greeting: Option<&FanoutMessage>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        if let Some(text) = greeting.and_then(encode) {
            let _ = tx.try_send(text);
        }
        self.subscribers().insert(
            id,
            Subscriber {
                tx,
                last_seen: Instant::now(),
            },
        );
        debug!(id, "Fan-out subscriber added");
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        if self.subscribers().remove(&id).is_some() {
            debug!(id, "Fan-out subscriber removed");
        }
    }

    /// Record that a subscriber is still alive (pong or any inbound frame).
    pub fn touch(&self, id: u64) {
        if let Some(sub) = self.subscribers().get_mut(&id) {
            sub.last_seen = Instant::now();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Push a message to every live subscriber. Returns how many got it.
    pub fn publish(&self, message: &FanoutMessage) -> usize {
        let Some(text) = encode(message) else {
            return 0;
        };
        let mut delivered = 0;
        let mut subscribers = self.subscribers();
        subscribers.retain(|id, sub| match sub.tx.try_send(text.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(id, "Fan-out subscriber is behind, message dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Merge readings into the latest-levels map and publish them.
    pub fn publish_telemetry(&self, readings: Vec<TelemetryReading>) -> usize {
        if readings.is_empty() {
            return 0;
        }
        {
            let mut latest = self.latest();
            for reading in &readings {
                latest.insert((reading.class, reading.channel), *reading);
            }
        }
        self.publish(&FanoutMessage::Telemetry {
            timestamp_ms: unix_ms(),
            readings,
        })
    }

    pub fn latest_readings(&self) -> Vec<TelemetryReading> {
        self.latest().values().copied().collect()
    }

    /// Drop subscribers whose channel closed or that were silent longer than `max_idle`.
    pub fn prune(&self, max_idle: Duration) -> usize {
        let mut subscribers = self.subscribers();
        let before = subscribers.len();
        subscribers.retain(|_, sub| !sub.tx.is_closed() && sub.last_seen.elapsed() <= max_idle);
        before - subscribers.len()
    }
}

fn encode(message: &FanoutMessage) -> Option<Arc<str>> {
    match serde_json::to_string(message) {
        Ok(text) => Some(Arc::from(text)),
        Err(e) => {
            warn!(error = %e, "Failed to encode fan-out message");
            None
        }
    }
}

pub fn connection_message(event: &str, client: &ConsoleClient, watchdog: &Watchdog) -> FanoutMessage {
    FanoutMessage::Connection {
        timestamp_ms: unix_ms(),
        event: event.to_string(),
        connected: client.is_connected(),
        watchdog: watchdog.status(),
    }
}

pub fn snapshot_message(fanout: &Fanout, client: &ConsoleClient, watchdog: &Watchdog) -> FanoutMessage {
    FanoutMessage::Snapshot {
        readings: fanout.latest_readings(),
        connected: client.is_connected(),
        watchdog: watchdog.status(),
    }
}

// -- Background loops --

/// Relay client and watchdog events to subscribers until shutdown.
pub async fn relay(
    fanout: Arc<Fanout>,
    client: ConsoleClient,
    watchdog: Watchdog,
    shutdown: CancellationToken,
) {
    let mut client_events = client.subscribe();
    let mut watchdog_events = watchdog.subscribe();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = client_events.recv() => match event {
                Ok(ClientEvent::Telemetry(readings)) => {
                    fanout.publish_telemetry(readings);
                }
                Ok(event @ (ClientEvent::Connected | ClientEvent::Disconnected { .. })) => {
                    fanout.publish(&connection_message(event.name(), &client, &watchdog));
                }
                Ok(ClientEvent::Error { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("fan-out relay lagged by {n} client events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = watchdog_events.recv() => match event {
                Ok(event @ (WatchdogEvent::Attempt { .. } | WatchdogEvent::Reconnected { .. })) => {
                    fanout.publish(&connection_message(event.name(), &client, &watchdog));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("fan-out relay lagged by {n} watchdog events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Poll VU levels for the configured channels while the client is connected.
pub async fn poll_levels(
    fanout: Arc<Fanout>,
    client: ConsoleClient,
    inputs: Vec<u16>,
    outputs: Vec<u16>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let channels: Vec<(ChannelClass, u16)> = inputs
        .iter()
        .map(|&n| (ChannelClass::Input, n))
        .chain(outputs.iter().map(|&n| (ChannelClass::Output, n)))
        .collect();

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }
        if !client.is_connected() {
            continue;
        }

        let mut readings = Vec::with_capacity(channels.len());
        for &(class, channel) in &channels {
            match client.get_meter(class, channel).await {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    debug!(%class, channel, error = %e, "VU poll failed, skipping cycle");
                    break;
                }
            }
        }
        fanout.publish_telemetry(readings);
    }
}

/// Periodically prune dead subscribers.
pub async fn prune_loop(fanout: Arc<Fanout>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let pruned = fanout.prune(period * 2);
                if pruned > 0 {
                    info!(pruned, remaining = fanout.subscriber_count(), "Pruned dead subscribers");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monmix_protocol::status::ConnectionConfig;

    fn reading(class: ChannelClass, channel: u16, level_db: f32) -> TelemetryReading {
        TelemetryReading {
            class,
            channel,
            level_db,
            peak_db: level_db,
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let fanout = Fanout::new();
        let mut a = fanout.subscribe(None);
        let mut b = fanout.subscribe(None);

        let delivered = fanout.publish_telemetry(vec![reading(ChannelClass::Input, 1, -20.0)]);
        assert_eq!(delivered, 2);

        for sub in [&mut a, &mut b] {
            let text = sub.rx.try_recv().unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "telemetry");
            assert_eq!(value["readings"][0]["class"], "IN");
            assert_eq!(value["readings"][0]["level_db"], -20.0);
        }
    }

    #[test]
    fn test_latest_levels_are_merged() {
        let fanout = Fanout::new();
        fanout.publish_telemetry(vec![
            reading(ChannelClass::Input, 1, -20.0),
            reading(ChannelClass::Output, 2, -30.0),
        ]);
        fanout.publish_telemetry(vec![reading(ChannelClass::Input, 1, -10.0)]);

        let latest = fanout.latest_readings();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].level_db, -10.0);
        assert_eq!(latest[1].class, ChannelClass::Output);
    }

    #[test]
    fn test_closed_subscriber_is_dropped_on_publish() {
        let fanout = Fanout::new();
        let gone = fanout.subscribe(None);
        let _kept = fanout.subscribe(None);
        drop(gone);

        assert_eq!(fanout.publish_telemetry(vec![reading(ChannelClass::Input, 1, -5.0)]), 1);
        assert_eq!(fanout.subscriber_count(), 1);
    }

    #[test]
    fn test_greeting_is_first_message() {
        let fanout = Fanout::new();
        let watchdog = Watchdog::new(Default::default());
        let client = ConsoleClient::new(ConnectionConfig::simulated());

        let greeting = snapshot_message(&fanout, &client, &watchdog);
        let mut sub = fanout.subscribe(Some(&greeting));
        let value: serde_json::Value = serde_json::from_str(&sub.rx.try_recv().unwrap()).unwrap();
        assert_eq!(value["type"], "snapshot");
        assert_eq!(value["connected"], false);
        assert_eq!(value["watchdog"]["state"], "idle");
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_removes_silent_subscribers() {
        let fanout = Fanout::new();
        let quiet = fanout.subscribe(None);
        let chatty = fanout.subscribe(None);

        tokio::time::advance(Duration::from_secs(20)).await;
        fanout.touch(chatty.id);
        tokio::time::advance(Duration::from_secs(20)).await;

        assert_eq!(fanout.prune(Duration::from_secs(30)), 1);
        assert_eq!(fanout.subscriber_count(), 1);
        drop(quiet);
        fanout.unsubscribe(chatty.id);
        assert_eq!(fanout.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_relay_pushes_connection_and_telemetry() {
        let fanout = Arc::new(Fanout::new());
        let client = ConsoleClient::new(ConnectionConfig::simulated());
        let watchdog = Watchdog::new(Default::default());
        let shutdown = CancellationToken::new();
        let mut sub = fanout.subscribe(None);

        tokio::spawn(relay(fanout.clone(), client.clone(), watchdog.clone(), shutdown.clone()));
        tokio::task::yield_now().await;

        client.connect().await.unwrap();

        let mut saw_connection = false;
        let mut saw_telemetry = false;
        while !(saw_connection && saw_telemetry) {
            let text = tokio::time::timeout(Duration::from_secs(2), sub.rx.recv())
                .await
                .unwrap()
                .unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            match value["type"].as_str() {
                Some("connection") => {
                    assert_eq!(value["event"], "connected");
                    assert_eq!(value["connected"], true);
                    saw_connection = true;
                }
                Some("telemetry") => saw_telemetry = true,
                other => panic!("unexpected message {:?}", other),
            }
        }

        shutdown.cancel();
        client.disconnect().await;
    }

    #[tokio::test]
    async fn test_poller_publishes_requested_channels() {
        let fanout = Arc::new(Fanout::new());
        let client = ConsoleClient::new(ConnectionConfig::simulated());
        client.connect().await.unwrap();
        let shutdown = CancellationToken::new();

        tokio::spawn(poll_levels(
            fanout.clone(),
            client.clone(),
            vec![1, 2],
            vec![1],
            Duration::from_millis(20),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        let latest = fanout.latest_readings();
        assert!(latest.iter().any(|r| r.class == ChannelClass::Input && r.channel == 2));
        assert!(latest.iter().any(|r| r.class == ChannelClass::Output && r.channel == 1));

        shutdown.cancel();
        client.disconnect().await;
    }
}
