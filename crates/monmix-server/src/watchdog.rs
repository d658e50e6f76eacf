/// Reconnection watchdog.
///
/// A small state machine that keeps the console link alive unattended:
///
/// ```text
///   idle ──start──▶ watching ──timer──▶ connecting ──ok──▶ connected ─▶ watching
///                      ▲                    │
///                      └──── fail (×2) ─────┘          stop: any ─▶ stopped
/// ```
///
/// The watchdog is configured with two operations on the client
/// (`is_connected`, `reconnect`) and owns at most one retry timer. Backoff
/// starts at the base interval, doubles on every failed attempt up to the
/// cap, and resets only on a successful reconnection. Failures are absorbed
/// into status and events; nothing here returns an error to the owner.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use monmix_protocol::status::{WatchdogState, WatchdogStatus};

use crate::client::{ClientEvent, ConsoleClient};
use crate::unix_ms;

pub const DEFAULT_BASE_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(300);

const EVENT_CAPACITY: usize = 64;

pub type ConnectedFn = Arc<dyn Fn() -> bool + Send + Sync>;
pub type ReconnectFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type ReconnectFn = Arc<dyn Fn() -> ReconnectFuture + Send + Sync>;

/// Events published by the watchdog.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogEvent {
    StateChange {
        state: WatchdogState,
        previous: WatchdogState,
    },
    Attempt {
        attempt: u32,
    },
    AttemptFailed {
        attempt: u32,
        error: String,
        next_delay_ms: u64,
    },
    Reconnected {
        attempts: u32,
    },
}

impl WatchdogEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateChange { .. } => "stateChange",
            Self::Attempt { .. } => "attempt",
            Self::AttemptFailed { .. } => "attemptFailed",
            Self::Reconnected { .. } => "reconnected",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_INTERVAL,
            max: DEFAULT_MAX_INTERVAL,
        }
    }
}

impl Backoff {
    pub fn next(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max)
    }
}

struct Inner {
    state: WatchdogState,
    attempts: u32,
    last_attempt_ms: Option<u64>,
    next_attempt_ms: Option<u64>,
    last_error: Option<String>,
    interval: Duration,
    is_connected: Option<ConnectedFn>,
    reconnect: Option<ReconnectFn>,
    timer: Option<JoinHandle<()>>,
    /// Identifies the most recently scheduled timer
    timer_seq: u64,
}

/// Cheap-to-clone handle to the single watchdog.
#[derive(Clone)]
pub struct Watchdog {
    inner: Arc<Mutex<Inner>>,
    events: broadcast::Sender<WatchdogEvent>,
    backoff: Backoff,
}

impl Watchdog {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: WatchdogState::Idle,
                attempts: 0,
                last_attempt_ms: None,
                next_attempt_ms: None,
                last_error: None,
                interval: backoff.base,
                is_connected: None,
                reconnect: None,
                timer: None,
                timer_seq: 0,
            })),
            events: broadcast::channel(EVENT_CAPACITY).0,
            backoff,
        }
    }

    /// Inject the operations the watchdog drives.
    pub fn configure(&self, is_connected: ConnectedFn, reconnect: ReconnectFn) {
        let mut inner = self.lock();
        inner.is_connected = Some(is_connected);
        inner.reconnect = Some(reconnect);
    }

    /// Configure against a console client. The closures hold the client
    /// handle itself, so a later `reconfigure` on the client is picked up.
    pub fn configure_client(&self, client: &ConsoleClient) {
        let probe = client.clone();
        let driver = client.clone();
        self.configure(
            Arc::new(move || probe.is_connected()),
            Arc::new(move || {
                let client = driver.clone();
                Box::pin(async move { client.connect().await.map_err(anyhow::Error::from) })
            }),
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchdogEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> WatchdogStatus {
        let inner = self.lock();
        WatchdogStatus {
            state: inner.state,
            attempts: inner.attempts,
            last_attempt_ms: inner.last_attempt_ms,
            next_attempt_ms: inner.next_attempt_ms,
            last_error: inner.last_error.clone(),
            current_interval_ms: inner.interval.as_millis() as u64,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.lock().state
    }

    // -- Transitions --

    pub fn start(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, WatchdogState::Watching | WatchdogState::Connecting) {
            debug!(state = %inner.state, "Watchdog already running");
            return;
        }
        if inner.is_connected.is_none() || inner.reconnect.is_none() {
            warn!("Watchdog start requested before it was configured");
            return;
        }
        inner.interval = self.backoff.base;
        self.set_state(&mut inner, WatchdogState::Watching);
        let delay = inner.interval;
        self.schedule(&mut inner, delay);
        info!(interval_secs = delay.as_secs(), "Watchdog started");
    }

    pub fn stop(&self) {
        let mut inner = self.lock();
        cancel_timer(&mut inner);
        inner.next_attempt_ms = None;
        if inner.state != WatchdogState::Stopped {
            info!("Watchdog stopped");
        }
        self.set_state(&mut inner, WatchdogState::Stopped);
    }

    /// The link came up by any route.
    pub fn on_connected(&self) {
        let mut inner = self.lock();
        cancel_timer(&mut inner);
        inner.next_attempt_ms = None;
        inner.attempts = 0;
        inner.interval = self.backoff.base;
        inner.last_error = None;
        self.set_state(&mut inner, WatchdogState::Connected);
    }

    /// The link went down. Ignored unless connected or idle, so a drop
    /// reported while already retrying cannot double-schedule.
    pub fn on_disconnected(&self, reason: &str) {
        let mut inner = self.lock();
        if !matches!(inner.state, WatchdogState::Connected | WatchdogState::Idle) {
            debug!(state = %inner.state, reason, "Disconnect ignored by watchdog");
            return;
        }
        if inner.is_connected.is_none() || inner.reconnect.is_none() {
            warn!(reason, "Console disconnected but watchdog is not configured");
            return;
        }
        warn!(reason, "Console disconnected, watchdog taking over");
        inner.last_error = Some(reason.to_string());
        self.set_state(&mut inner, WatchdogState::Watching);
        self.schedule(&mut inner, Duration::ZERO);
    }

    // -- Internals --

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_state(&self, inner: &mut Inner, state: WatchdogState) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        debug!(state = %state, previous = %previous, "Watchdog state change");
        let _ = self.events.send(WatchdogEvent::StateChange { state, previous });
    }

    fn schedule(&self, inner: &mut Inner, delay: Duration) {
        cancel_timer(inner);
        inner.timer_seq += 1;
        let seq = inner.timer_seq;
        let deadline = Instant::now() + delay;
        inner.next_attempt_ms = Some(unix_ms() + delay.as_millis() as u64);

        let watchdog = self.clone();
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            watchdog.fire(seq).await;
        }));
    }

    async fn fire(&self, seq: u64) {
        let (reconnect, attempt) = {
            let mut inner = self.lock();
            if inner.timer_seq != seq || inner.state == WatchdogState::Stopped {
                return;
            }
            // Past this point the attempt runs to completion; stop() only
            // prevents the next one from being scheduled.
            inner.timer = None;
            inner.next_attempt_ms = None;

            let (is_connected, reconnect) = match (&inner.is_connected, &inner.reconnect) {
                (Some(c), Some(r)) => (c.clone(), r.clone()),
                _ => return,
            };

            if is_connected() {
                debug!("Console already connected, watchdog idling");
                self.set_state(&mut inner, WatchdogState::Connected);
                return;
            }

            inner.attempts += 1;
            inner.last_attempt_ms = Some(unix_ms());
            let attempt = inner.attempts;
            self.set_state(&mut inner, WatchdogState::Connecting);
            let _ = self.events.send(WatchdogEvent::Attempt { attempt });
            (reconnect, attempt)
        };

        info!(attempt, "Watchdog reconnect attempt");
        let result = reconnect().await;

        let mut inner = self.lock();
        if inner.state == WatchdogState::Stopped {
            return;
        }
        match result {
            Ok(()) => {
                info!(attempt, "Watchdog reconnected");
                let _ = self.events.send(WatchdogEvent::Reconnected { attempts: attempt });
                inner.interval = self.backoff.base;
                inner.last_error = None;
                self.set_state(&mut inner, WatchdogState::Connected);
                self.set_state(&mut inner, WatchdogState::Watching);
                // Keep an eye on the link; the next tick settles in `connected`
                // if it is still up.
                let delay = inner.interval;
                self.schedule(&mut inner, delay);
            }
            Err(e) if inner.state == WatchdogState::Connected => {
                // Someone else connected while this attempt was failing.
                debug!(attempt, error = %e, "Watchdog attempt failed after external connect");
            }
            Err(e) => {
                let error = e.to_string();
                inner.last_error = Some(error.clone());
                inner.interval = self.backoff.next(inner.interval);
                let delay = inner.interval;
                warn!(
                    attempt,
                    error = %error,
                    next_delay_secs = delay.as_secs(),
                    "Watchdog reconnect failed"
                );
                let _ = self.events.send(WatchdogEvent::AttemptFailed {
                    attempt,
                    error,
                    next_delay_ms: delay.as_millis() as u64,
                });
                self.set_state(&mut inner, WatchdogState::Watching);
                self.schedule(&mut inner, delay);
            }
        }
    }
}

fn cancel_timer(inner: &mut Inner) {
    if let Some(timer) = inner.timer.take() {
        timer.abort();
    }
}

/// Feed client connection events into the watchdog until shutdown.
pub async fn follow_client(
    watchdog: Watchdog,
    mut events: broadcast::Receiver<ClientEvent>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::Connected) => watchdog.on_connected(),
                Ok(ClientEvent::Disconnected { reason }) => watchdog.on_disconnected(&reason),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("watchdog lagged by {n} client events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
