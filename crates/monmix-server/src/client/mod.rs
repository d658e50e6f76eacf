/// Console protocol client.
///
/// Owns the single link to the console (or the simulator), turns typed
/// operations into command lines and matches reply lines back to callers.
///
/// The protocol carries no request id: replies are matched to the oldest
/// pending command (FIFO). Overlapping commands of different kinds can
/// therefore be mismatched if the console ever answers out of order or
/// stays silent on one of them. A reply that does not fit the command it
/// was matched to is logged, and queries read it as unparseable; the queue
/// is not reordered.
///
/// One exception to strict FIFO: a `VU` line only answers a pending
/// `GET VU` for the same channel. Any other `VU` line is unsolicited
/// telemetry, even while other commands are waiting.
///
/// Events (`connected`, `disconnected`, `error`, `telemetry`) are delivered
/// through a broadcast channel; see [`ConsoleClient::subscribe`].

pub mod error;
pub mod simulator;
mod transport;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use monmix_protocol::status::{ConnectionConfig, ConnectionStatus, Transport};
use monmix_protocol::{
    clamp_gain, clamp_vu, ChannelClass, Command, ProtocolError, Response, TelemetryReading,
    GAIN_MIN_DB, VU_MIN_DB,
};

pub use error::{ClientError, Result};
use transport::{Link, ReaderExit};

/// How many times the client retries on its own after losing the link
/// before leaving recovery to the watchdog.
const OWN_RECONNECT_TRIES: u32 = 3;

const EVENT_CAPACITY: usize = 256;

/// Events published by the client.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    Error { message: String },
    Telemetry(Vec<TelemetryReading>),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected { .. } => "disconnected",
            Self::Error { .. } => "error",
            Self::Telemetry(_) => "telemetry",
        }
    }
}

/// A command awaiting its reply.
struct PendingCommand {
    id: u64,
    command: Command,
    issued_at: Instant,
    reply: oneshot::Sender<Response>,
}

struct ClientInner {
    config: RwLock<ConnectionConfig>,
    link: tokio::sync::Mutex<Option<Link>>,
    /// Serializes connect/disconnect/reconfigure
    lifecycle: tokio::sync::Mutex<()>,
    connected: AtomicBool,
    /// Bumped on every connect and teardown; stale reader tasks compare against it
    generation: AtomicU64,
    /// Set by an explicit disconnect; suppresses the client's own reconnects
    manual_disconnect: AtomicBool,
    pending: Mutex<VecDeque<PendingCommand>>,
    next_id: AtomicU64,
    last_error: Mutex<Option<String>>,
    events: broadcast::Sender<ClientEvent>,
}

/// Cheap-to-clone handle; all clones share one connection.
#[derive(Clone)]
pub struct ConsoleClient {
    inner: Arc<ClientInner>,
}

impl ConsoleClient {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config: RwLock::new(config),
                link: tokio::sync::Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                connected: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                manual_disconnect: AtomicBool::new(false),
                pending: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(1),
                last_error: Mutex::new(None),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> ConnectionConfig {
        match self.inner.config.read() {
            Ok(cfg) => cfg.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            connected: self.is_connected(),
            config: self.config(),
            pending_commands: self.pending_count(),
            last_error: self.last_error(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().ok().and_then(|e| e.clone())
    }

    // -- Lifecycle --

    /// Establish the link. A no-op if already connected.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.inner.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);

        let config = self.config();
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let link = if config.simulated {
            info!("Starting simulated console");
            Link::Simulated(simulator::SimulatedConsole::start(self.inner.events.clone()))
        } else {
            info!(address = %config.address(), transport = ?config.transport, "Connecting to console");
            let opened = match config.transport {
                Transport::Stream => transport::open_stream(&config).await,
                Transport::Datagram => transport::open_datagram(&config).await,
            };
            let (link, reader) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    warn!(address = %config.address(), error = %e, "Console connection failed");
                    self.record_error(e.to_string());
                    return Err(e);
                }
            };
            if let Some(shutdown) = link.shutdown_token() {
                let client = self.clone();
                tokio::spawn(async move {
                    let reader_client = client.clone();
                    let exit = transport::read_lines(reader, shutdown, move |line| {
                        reader_client.handle_line(line)
                    })
                    .await;
                    if let ReaderExit::Lost(reason) = exit {
                        client.on_link_lost(generation, reason).await;
                    }
                });
            }
            link
        };

        *self.inner.link.lock().await = Some(link);
        self.inner.connected.store(true, Ordering::SeqCst);
        self.clear_error();
        info!(address = %config.address(), simulated = config.simulated, "Console connected");
        self.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Tear down the link and stop the client's own reconnect attempts.
    pub async fn disconnect(&self) {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        self.teardown("manual disconnect").await;
    }

    /// Replace the connection parameters. Tears down the current link; the
    /// caller connects again when ready.
    pub async fn reconfigure(&self, config: ConnectionConfig) {
        let _guard = self.inner.lifecycle.lock().await;
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);
        self.teardown("reconfigured").await;
        info!(address = %config.address(), simulated = config.simulated, "Console configuration replaced");
        match self.inner.config.write() {
            Ok(mut cfg) => *cfg = config,
            Err(poisoned) => *poisoned.into_inner() = config,
        }
    }

    async fn teardown(&self, reason: &str) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let link = self.inner.link.lock().await.take();
        if let Some(link) = link {
            link.shutdown();
        }
        self.fail_pending();
        if self.inner.connected.swap(false, Ordering::SeqCst) {
            info!(reason, "Console disconnected");
            self.emit(ClientEvent::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    async fn on_link_lost(&self, generation: u64, reason: String) {
        {
            let _guard = self.inner.lifecycle.lock().await;
            if self.inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }
            warn!(reason = %reason, "Console link lost");
            self.emit(ClientEvent::Error {
                message: reason.clone(),
            });
            self.record_error(reason.clone());
            self.teardown(&reason).await;
        }
        self.spawn_own_reconnect();
    }

    /// Best-effort retries after a link loss. The watchdog stays the primary
    /// recovery path; these stop on any explicit disconnect or reconfigure.
    fn spawn_own_reconnect(&self) {
        let interval_ms = self.config().reconnect_interval_ms;
        if interval_ms == 0 {
            return;
        }
        let client = self.clone();
        tokio::spawn(async move {
            for attempt in 1..=OWN_RECONNECT_TRIES {
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                if client.inner.manual_disconnect.load(Ordering::SeqCst) || client.is_connected() {
                    return;
                }
                debug!(attempt, "Client reconnect attempt");
                if client.connect().await.is_ok() {
                    return;
                }
            }
            debug!("Client reconnect attempts exhausted");
        });
    }

    // -- Request / reply --

    /// Send a command and wait for the next reply line (FIFO).
    pub async fn request(&self, command: Command) -> Result<Response> {
        let timeout = Duration::from_millis(self.config().command_timeout_ms);
        let line = command.encode();
        let (tx, rx) = oneshot::channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut link = self.inner.link.lock().await;
            let link = match link.as_mut() {
                Some(link) if self.is_connected() => link,
                _ => return Err(ClientError::NotConnected),
            };

            self.push_pending(PendingCommand {
                id,
                command: command.clone(),
                issued_at: Instant::now(),
                reply: tx,
            });

            if let Some(sim) = link.simulator() {
                let reply = sim.respond(&line);
                self.handle_line(&reply);
            } else if let Err(e) = link.write_line(&line).await {
                self.remove_pending(id);
                self.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
                return Err(e);
            }
        }

        debug!(command = %command, "Sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ClientError::Closed(command.to_string())),
            Err(_) => {
                self.remove_pending(id);
                Err(ClientError::Timeout {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Route one inbound line: reply to the oldest pending command, or
    /// unsolicited telemetry.
    pub(crate) fn handle_line(&self, line: &str) {
        let response = Response::parse(line);

        let pending = {
            let mut queue = match self.inner.pending.lock() {
                Ok(queue) => queue,
                Err(_) => return,
            };
            let takes_reply = match (&response, queue.front()) {
                (_, None) => false,
                // A meter line only answers a pending GET VU for that channel.
                (Response::Meter(r), Some(front)) => matches!(
                    front.command,
                    Command::GetVu { class, channel } if class == r.class && channel == r.channel
                ),
                (_, Some(_)) => true,
            };
            if takes_reply {
                queue.pop_front()
            } else {
                None
            }
        };

        match pending {
            Some(pending) => {
                if !pending.command.accepts(&response) {
                    warn!(
                        command = %pending.command,
                        reply = %line.trim(),
                        "Reply does not match oldest pending command (possible FIFO mismatch)"
                    );
                }
                debug!(
                    command = %pending.command,
                    elapsed_ms = pending.issued_at.elapsed().as_millis() as u64,
                    "Reply received"
                );
                let _ = pending.reply.send(response);
            }
            None => match response {
                Response::Meter(reading) => self.emit(ClientEvent::Telemetry(vec![reading])),
                other => debug!(line = ?other, "Unsolicited line ignored"),
            },
        }
    }

    fn push_pending(&self, pending: PendingCommand) {
        if let Ok(mut queue) = self.inner.pending.lock() {
            queue.push_back(pending);
        }
    }

    fn remove_pending(&self, id: u64) {
        if let Ok(mut queue) = self.inner.pending.lock() {
            queue.retain(|p| p.id != id);
        }
    }

    /// Drop every pending command; waiting callers see `Closed`.
    fn fail_pending(&self) {
        if let Ok(mut queue) = self.inner.pending.lock() {
            queue.clear();
        }
    }

    // -- Typed operations --

    /// Set a channel's gain. Returns the clamped value actually sent.
    pub async fn set_gain(&self, class: ChannelClass, channel: u16, db: f32) -> Result<f32> {
        let db = clamp_gain(db);
        let response = self.request(Command::SetGain { class, channel, db }).await?;
        expect_ack(response)?;
        Ok(db)
    }

    /// Send a query and return its numeric value. A reply that does not fit
    /// the query counts as unparseable.
    async fn query_value(&self, command: Command) -> Result<Option<f32>> {
        let response = self.request(command.clone()).await?;
        Ok(if command.accepts(&response) {
            response.value()
        } else {
            None
        })
    }

    /// Read a channel's gain; unparseable replies read as the -60 dB floor.
    pub async fn get_gain(&self, class: ChannelClass, channel: u16) -> Result<f32> {
        let value = self.query_value(Command::GetGain { class, channel }).await?;
        Ok(value.map(clamp_gain).unwrap_or(GAIN_MIN_DB))
    }

    pub async fn set_mute(&self, class: ChannelClass, channel: u16, muted: bool) -> Result<()> {
        let response = self.request(Command::SetMute { class, channel, muted }).await?;
        expect_ack(response)
    }

    /// Set the level of `class channel` into output `bus`.
    ///
    /// The underlying command is undocumented; real consoles may reject it
    /// or never answer. Treat errors as non-fatal.
    pub async fn set_send(
        &self,
        class: ChannelClass,
        channel: u16,
        bus: u16,
        db: f32,
    ) -> Result<f32> {
        if !class.can_send() {
            return Err(ClientError::InvalidArgument(format!(
                "{} channels cannot feed a bus",
                class
            )));
        }
        let db = clamp_gain(db);
        let response = self
            .request(Command::SetSend { class, channel, bus, db })
            .await?;
        expect_ack(response)?;
        Ok(db)
    }

    pub async fn get_send(&self, class: ChannelClass, channel: u16, bus: u16) -> Result<f32> {
        if !class.can_send() {
            return Err(ClientError::InvalidArgument(format!(
                "{} channels cannot feed a bus",
                class
            )));
        }
        let value = self.query_value(Command::GetSend { class, channel, bus }).await?;
        Ok(value.map(clamp_gain).unwrap_or(GAIN_MIN_DB))
    }

    pub async fn set_preset(&self, preset: u16) -> Result<()> {
        let response = self.request(Command::SetPreset { preset }).await?;
        expect_ack(response)
    }

    pub async fn get_preset(&self) -> Result<u16> {
        let response = self.request(Command::GetPreset).await?;
        if !Command::GetPreset.accepts(&response) {
            return Err(ProtocolError::Malformed(format!("{:?}", response)).into());
        }
        match response {
            Response::Preset(n) => Ok(n),
            Response::Error(msg) => Err(ProtocolError::Rejected(msg).into()),
            other => other
                .value()
                .filter(|v| *v >= 0.0)
                .map(|v| v as u16)
                .ok_or_else(|| ProtocolError::Malformed(format!("{:?}", other)).into()),
        }
    }

    /// Meter reading for one channel; unparseable replies read as the floor.
    pub async fn get_meter(&self, class: ChannelClass, channel: u16) -> Result<TelemetryReading> {
        let command = Command::GetVu { class, channel };
        let response = self.request(command.clone()).await?;
        let fits = command.accepts(&response);
        Ok(match response {
            Response::Meter(reading) if fits => reading,
            other => {
                let level_db = other
                    .value()
                    .filter(|_| fits)
                    .map(clamp_vu)
                    .unwrap_or(VU_MIN_DB);
                TelemetryReading {
                    class,
                    channel,
                    level_db,
                    peak_db: level_db,
                }
            }
        })
    }

    /// VU level in dB, within [-60, 0].
    pub async fn get_vu(&self, class: ChannelClass, channel: u16) -> Result<f32> {
        Ok(self.get_meter(class, channel).await?.level_db)
    }

    // -- Helpers --

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine.
        let _ = self.inner.events.send(event);
    }

    fn record_error(&self, message: String) {
        if let Ok(mut last) = self.inner.last_error.lock() {
            *last = Some(message);
        }
    }

    fn clear_error(&self) {
        if let Ok(mut last) = self.inner.last_error.lock() {
            *last = None;
        }
    }
}

fn expect_ack(response: Response) -> Result<()> {
    match response {
        Response::Error(msg) => Err(ProtocolError::Rejected(msg).into()),
        _ => Ok(()),
    }
}
