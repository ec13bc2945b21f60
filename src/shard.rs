use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Interval, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use crate::compression::ZlibStreamDecoder;
use crate::config::GatewayConfig;
use crate::error::Error;
use crate::events::GatewayEvent;
use crate::protocol::{self, is_fatal_close, Envelope, Opcode, GATEWAY_VERSION};

/// Fixed delay between reconnect attempts.
pub(crate) const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);

/// Close code reported when the peer closed without a close frame.
const NO_STATUS_CODE: u16 = 1005;

/// Connection state of a single shard. Owned exclusively by the shard's task;
/// other components only read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    Disconnected,
    Handshaking,
    Identifying,
    Resuming,
    Ready,
    Reconnecting,
}

/// Per-shard session state enabling resume instead of a full re-handshake.
///
/// `session_id` and `resume_url` are set only on `READY`/`RESUMED`; all fields
/// are cleared when the server signals the session is not resumable. The state
/// survives reconnect attempts so a resume can be tried first.
#[derive(Debug, Clone, Default)]
pub struct ShardSession {
    pub session_id: Option<String>,
    pub sequence: Option<i64>,
    pub resume_url: Option<String>,
}

impl ShardSession {
    /// Capture session identity from a READY/RESUMED dispatch payload.
    fn record_ready(&mut self, d: &Value) {
        if let Some(id) = d.get("session_id").and_then(Value::as_str) {
            self.session_id = Some(id.to_owned());
        }
        if let Some(url) = d.get("resume_gateway_url").and_then(Value::as_str) {
            self.resume_url = Some(url.to_owned());
        }
    }

    /// Drop all resume state after a non-resumable session invalidation.
    fn invalidate(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_url = None;
    }

    fn can_resume(&self) -> bool {
        self.session_id.is_some()
    }
}

/// Heartbeat bookkeeping; latency is recomputed on every acknowledgment.
#[derive(Debug, Default)]
pub(crate) struct HeartbeatTimers {
    last_sent: Option<Instant>,
    last_ack: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatTimers {
    fn record_sent(&mut self) {
        self.last_sent = Some(Instant::now());
    }

    fn record_ack(&mut self) -> Option<Duration> {
        self.last_ack = Some(Instant::now());
        self.latency = self
            .last_sent
            .zip(self.last_ack)
            .map(|(sent, ack)| ack.duration_since(sent));
        self.latency
    }
}

/// Commands the owning manager can send to a running shard.
#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Close the socket and stop without reconnecting.
    Disconnect,
    /// Close the socket and re-run the connect procedure (resume if held).
    Reconnect,
}

/// How a connection session ended, deciding what the outer loop does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// Explicit disconnect: stop, no reconnect is scheduled.
    Requested,
    /// Fatal close code: surface and stop.
    Fatal { code: u16 },
    /// Retryable close or recoverable error: reconnect on the fixed interval.
    Retry,
}

/// Externally held reference to a spawned shard.
///
/// The registry in the sharding manager stores these; shard internals stay
/// owned by the shard task and are only observable through this handle.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    id: u16,
    state: Arc<RwLock<ShardState>>,
    latency: Arc<RwLock<Option<Duration>>>,
    commands: mpsc::Sender<ShardCommand>,
}

impl ShardHandle {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> ShardState {
        *self.state.read()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ShardState::Ready
    }

    /// Round-trip latency of the most recent heartbeat/ack pair.
    pub fn latency(&self) -> Option<Duration> {
        *self.latency.read()
    }

    /// Request an explicit disconnect. The shard will not reconnect.
    pub async fn disconnect(&self) -> crate::Result<()> {
        self.commands
            .send(ShardCommand::Disconnect)
            .await
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }

    /// Force the shard to drop its socket and re-run the connect procedure.
    pub async fn reconnect(&self) -> crate::Result<()> {
        self.commands
            .send(ShardCommand::Reconnect)
            .await
            .map_err(|e| Error::ChannelSend(e.to_string()))
    }
}

/// One logical gateway connection running the protocol state machine.
pub(crate) struct Shard {
    id: u16,
    shard_count: u16,
    config: Arc<GatewayConfig>,
    gateway_url: String,
    state: Arc<RwLock<ShardState>>,
    latency: Arc<RwLock<Option<Duration>>>,
    session: ShardSession,
    heartbeat: HeartbeatTimers,
    /// Remaining reconnect attempts in the current cycle; refilled from the
    /// config whenever a connect succeeds. `None` retries indefinitely.
    attempts_left: Option<u32>,
    unavailable_guilds: Vec<String>,
    events: mpsc::UnboundedSender<GatewayEvent>,
    commands: mpsc::Receiver<ShardCommand>,
}

enum Step {
    Incoming(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
    Command(Option<ShardCommand>),
    Heartbeat,
}

/// Spawn a shard task and return its handle.
pub(crate) fn spawn(
    id: u16,
    shard_count: u16,
    config: Arc<GatewayConfig>,
    gateway_url: String,
    events: mpsc::UnboundedSender<GatewayEvent>,
) -> ShardHandle {
    let (command_tx, command_rx) = mpsc::channel(8);
    let shard = Shard::new(id, shard_count, config, gateway_url, events, command_rx);
    let handle = ShardHandle {
        id,
        state: shard.state.clone(),
        latency: shard.latency.clone(),
        commands: command_tx,
    };
    tokio::spawn(shard.run());
    handle
}

impl Shard {
    fn new(
        id: u16,
        shard_count: u16,
        config: Arc<GatewayConfig>,
        gateway_url: String,
        events: mpsc::UnboundedSender<GatewayEvent>,
        commands: mpsc::Receiver<ShardCommand>,
    ) -> Self {
        let attempts_left = config.reconnect_attempts;
        Self {
            id,
            shard_count,
            config,
            gateway_url,
            state: Arc::new(RwLock::new(ShardState::Disconnected)),
            latency: Arc::new(RwLock::new(None)),
            session: ShardSession::default(),
            heartbeat: HeartbeatTimers::default(),
            attempts_left,
            unavailable_guilds: Vec::new(),
            events,
            commands,
        }
    }

    /// Connect loop: one connection session per iteration, with the fixed
    /// reconnect interval between sessions. The attempt budget covers one
    /// reconnect cycle; every successful connect refills it.
    async fn run(mut self) {
        loop {
            let end = match self.run_connection().await {
                Ok(end) => end,
                Err(e) => {
                    warn!("[SHARD-{}] connection error: {e}", self.id);
                    self.emit(GatewayEvent::ShardError {
                        shard_id: self.id,
                        message: e.to_string(),
                    });
                    SessionEnd::Retry
                }
            };

            self.set_state(ShardState::Disconnected);

            match end {
                SessionEnd::Requested => {
                    info!("[SHARD-{}] disconnected on request", self.id);
                    self.emit(GatewayEvent::ShardDisconnect { shard_id: self.id });
                    return;
                }
                SessionEnd::Fatal { code } => {
                    warn!(
                        "[SHARD-{}] fatal close code {code}, not reconnecting",
                        self.id
                    );
                    return;
                }
                SessionEnd::Retry => {
                    if let Some(left) = self.attempts_left.as_mut() {
                        if *left == 0 {
                            warn!("[SHARD-{}] reconnect attempts exhausted", self.id);
                            return;
                        }
                        *left -= 1;
                    }
                    self.set_state(ShardState::Reconnecting);
                    debug!(
                        "[SHARD-{}] reconnecting in {:?}",
                        self.id, RECONNECT_INTERVAL
                    );
                    time::sleep(RECONNECT_INTERVAL).await;
                }
            }
        }
    }

    /// Run one connection session until the socket closes or a command stops
    /// it. Fails fast when invoked on a shard that is not disconnected.
    async fn run_connection(&mut self) -> crate::Result<SessionEnd> {
        {
            let mut state = self.state.write();
            if !matches!(
                *state,
                ShardState::Disconnected | ShardState::Reconnecting
            ) {
                return Err(Error::AlreadyConnected(self.id));
            }
            *state = ShardState::Handshaking;
        }

        let url = self.connect_url();
        debug!("[SHARD-{}] connecting to {url}", self.id);
        let (ws, _response) = connect_async(url.as_str()).await?;
        // The socket is open: this reconnect cycle is over, and the budget
        // for the next one starts fresh.
        self.attempts_left = self.config.reconnect_attempts;
        info!("[SHARD-{}] connected", self.id);

        let (mut write, mut read) = ws.split();
        let mut decoder = self.config.compress.then(ZlibStreamDecoder::new);
        let mut interval: Option<Interval> = None;
        let mut outbox: Vec<Envelope> = Vec::new();

        loop {
            let tick = async {
                match interval.as_mut() {
                    Some(i) => {
                        i.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };
            let step = tokio::select! {
                msg = read.next() => Step::Incoming(msg),
                cmd = self.commands.recv() => Step::Command(cmd),
                _ = tick => Step::Heartbeat,
            };

            let mut end = None;
            match step {
                Step::Incoming(Some(Ok(Message::Text(text)))) => {
                    end = self.handle_frame(&text, &mut outbox, &mut interval)?;
                }
                Step::Incoming(Some(Ok(Message::Binary(bytes)))) => match decoder.as_mut() {
                    Some(decoder) => match decoder.push(&bytes) {
                        Ok(Some(text)) => {
                            end = self.handle_frame(&text, &mut outbox, &mut interval)?;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // The inflate context is unrecoverable; close and
                            // reconnect rather than drop the frame.
                            warn!("[SHARD-{}] {e}", self.id);
                            self.emit(GatewayEvent::ShardError {
                                shard_id: self.id,
                                message: e.to_string(),
                            });
                            end = Some(SessionEnd::Retry);
                        }
                    },
                    None => {
                        self.emit(GatewayEvent::ShardWarn {
                            shard_id: self.id,
                            message: "binary frame received without negotiated compression"
                                .to_string(),
                        });
                    }
                },
                Step::Incoming(Some(Ok(Message::Close(frame)))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((NO_STATUS_CODE, String::new()));
                    warn!("[SHARD-{}] closed by server: {code} {reason}", self.id);
                    self.emit(GatewayEvent::ShardClose {
                        shard_id: self.id,
                        code,
                        reason,
                    });
                    end = Some(classify_close(code));
                }
                // Ping/pong frames are answered by the transport.
                Step::Incoming(Some(Ok(_))) => {}
                Step::Incoming(Some(Err(e))) => {
                    warn!("[SHARD-{}] websocket error: {e}", self.id);
                    self.emit(GatewayEvent::ShardError {
                        shard_id: self.id,
                        message: e.to_string(),
                    });
                    end = Some(SessionEnd::Retry);
                }
                Step::Incoming(None) => {
                    debug!("[SHARD-{}] stream ended", self.id);
                    end = Some(SessionEnd::Retry);
                }
                Step::Command(Some(ShardCommand::Disconnect)) | Step::Command(None) => {
                    end = Some(SessionEnd::Requested);
                }
                Step::Command(Some(ShardCommand::Reconnect)) => {
                    debug!("[SHARD-{}] reconnect requested", self.id);
                    end = Some(SessionEnd::Retry);
                }
                Step::Heartbeat => self.queue_heartbeat(&mut outbox),
            }

            for env in outbox.drain(..) {
                write.send(Message::Text(env.to_json())).await?;
            }

            if let Some(end) = end {
                let _ = write.send(Message::Close(None)).await;
                return Ok(end);
            }
        }
    }

    /// Gateway URL for the next connect: the stored resume URL when a session
    /// is held, else the fetched gateway URL.
    fn connect_url(&self) -> String {
        let base = if self.session.can_resume() {
            match self.session.resume_url.as_deref() {
                Some(url) => url.to_owned(),
                None => {
                    self.emit(GatewayEvent::ShardWarn {
                        shard_id: self.id,
                        message: "resume URL not known, falling back to the gateway URL"
                            .to_string(),
                    });
                    self.gateway_url.clone()
                }
            }
        } else {
            self.gateway_url.clone()
        };
        let compress = if self.config.compress {
            "&compress=zlib-stream"
        } else {
            ""
        };
        format!("{base}/?v={GATEWAY_VERSION}&encoding=json{compress}")
    }

    fn handle_frame(
        &mut self,
        text: &str,
        outbox: &mut Vec<Envelope>,
        interval: &mut Option<Interval>,
    ) -> crate::Result<Option<SessionEnd>> {
        let envelope = Envelope::from_json(text)?;
        self.handle_envelope(envelope, outbox, interval)
    }

    /// Apply one gateway envelope to the state machine. Outgoing payloads are
    /// queued on `outbox`; a returned `SessionEnd` terminates the session.
    fn handle_envelope(
        &mut self,
        envelope: Envelope,
        outbox: &mut Vec<Envelope>,
        interval: &mut Option<Interval>,
    ) -> crate::Result<Option<SessionEnd>> {
        let Some(op) = Opcode::from_u8(envelope.op) else {
            self.emit(GatewayEvent::ShardWarn {
                shard_id: self.id,
                message: format!("unexpected opcode {}", envelope.op),
            });
            return Ok(Some(SessionEnd::Retry));
        };

        match op {
            Opcode::Dispatch => {
                if let Some(s) = envelope.s {
                    self.session.sequence = Some(s);
                }
                let name = envelope.t.unwrap_or_default();
                match name.as_str() {
                    "READY" | "RESUMED" => {
                        self.session.record_ready(&envelope.d);
                        if let Some(guilds) = envelope.d.get("guilds").and_then(Value::as_array) {
                            self.unavailable_guilds = guilds
                                .iter()
                                .filter_map(|g| g.get("id").and_then(Value::as_str))
                                .map(str::to_owned)
                                .collect();
                        }
                        self.set_state(ShardState::Ready);
                        info!(
                            "[SHARD-{}] {} ({} unavailable guilds)",
                            self.id,
                            name.to_lowercase(),
                            self.unavailable_guilds.len()
                        );
                        self.emit(GatewayEvent::ShardReady { shard_id: self.id });
                    }
                    _ => {
                        trace!("[SHARD-{}] dispatch {name}", self.id);
                        self.emit(GatewayEvent::Dispatch {
                            shard_id: self.id,
                            name,
                            payload: envelope.d,
                        });
                    }
                }
            }
            Opcode::Heartbeat => self.queue_heartbeat(outbox),
            Opcode::Reconnect => {
                debug!("[SHARD-{}] server requested reconnect", self.id);
                // Session is preserved; the next connect attempts a resume.
                return Ok(Some(SessionEnd::Retry));
            }
            Opcode::InvalidSession => {
                let resumable = envelope.d.as_bool().unwrap_or(false);
                if resumable && self.session.can_resume() {
                    debug!("[SHARD-{}] session invalidated, resuming", self.id);
                    self.queue_resume(outbox);
                } else {
                    debug!("[SHARD-{}] session invalidated, re-identifying", self.id);
                    self.session.invalidate();
                    return Ok(Some(SessionEnd::Retry));
                }
            }
            Opcode::Hello => {
                if self.session.can_resume() {
                    self.queue_resume(outbox);
                } else {
                    self.queue_heartbeat(outbox);
                    self.queue_identify(outbox);
                    let period = envelope
                        .d
                        .get("heartbeat_interval")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| {
                            Error::Protocol("hello payload missing heartbeat_interval".into())
                        })?;
                    let mut heartbeat = time::interval(Duration::from_millis(period));
                    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    // An immediate heartbeat was already queued.
                    heartbeat.reset();
                    *interval = Some(heartbeat);
                }
            }
            Opcode::HeartbeatAck => {
                if let Some(latency) = self.heartbeat.record_ack() {
                    trace!("[SHARD-{}] heartbeat ack, latency {latency:?}", self.id);
                    *self.latency.write() = Some(latency);
                }
            }
            // Client-to-server opcodes are never valid inbound.
            Opcode::Identify | Opcode::Resume => {
                self.emit(GatewayEvent::ShardWarn {
                    shard_id: self.id,
                    message: format!("unexpected opcode {}", envelope.op),
                });
                return Ok(Some(SessionEnd::Retry));
            }
        }

        Ok(None)
    }

    fn queue_heartbeat(&mut self, outbox: &mut Vec<Envelope>) {
        outbox.push(protocol::heartbeat(self.session.sequence));
        self.heartbeat.record_sent();
    }

    fn queue_identify(&mut self, outbox: &mut Vec<Envelope>) {
        self.set_state(ShardState::Identifying);
        outbox.push(protocol::identify(
            &self.config.token,
            self.config.compress,
            self.config.large_threshold,
            self.config.intents,
            (self.id, self.shard_count),
        ));
    }

    fn queue_resume(&mut self, outbox: &mut Vec<Envelope>) {
        // Guarded by can_resume at every call site.
        if let Some(session_id) = self.session.session_id.clone() {
            self.set_state(ShardState::Resuming);
            outbox.push(protocol::resume(
                &self.config.token,
                &session_id,
                self.session.sequence,
            ));
        }
    }

    fn set_state(&self, next: ShardState) {
        *self.state.write() = next;
    }

    fn emit(&self, event: GatewayEvent) {
        // The receiver living shorter than the shard is not an error.
        let _ = self.events.send(event);
    }
}

fn classify_close(code: u16) -> SessionEnd {
    if is_fatal_close(code) {
        SessionEnd::Fatal { code }
    } else {
        SessionEnd::Retry
    }
}
