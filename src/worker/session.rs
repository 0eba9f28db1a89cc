//! Worker-side control session.
//!
//! The [`SessionBuilder`] configures the link and the [`WorkerSession`]
//! manages its lifecycle:
//! 1. Connect to the supervisor
//! 2. Send `Hello`
//! 3. Read control frames and dispatch room commands
//! 4. Relay room events through [`SessionHandle`]
//! 5. Send `Heartbeat` every `heartbeat_interval` while the link is up
//!
//! Reconnecting after link loss is left to the caller; the session reports
//! the loss through [`RoomCommands::on_supervisor_disconnected`] and
//! [`WorkerSession::wait_for_shutdown`].
//!
//! # Example
//!
//! ```ignore
//! use danmaku_relay::worker::{RoomCommands, SessionHandle, WorkerSession};
//!
//! struct Rooms;
//!
//! impl RoomCommands for Rooms {
//!     fn on_room_open(&mut self, room_id: u64, session: &SessionHandle) {
//!         // spawn a RoomConnection and relay through `session`
//!     }
//!     fn on_room_close(&mut self, room_id: u64, _session: &SessionHandle) {}
//! }
//!
//! let session = WorkerSession::builder()
//!     .max_rooms(256)
//!     .connect("127.0.0.1:9090", Rooms)
//!     .await?;
//! session.wait_for_shutdown().await?;
//! ```

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::WorkerConfig;
use crate::control::{ControlFrameBuffer, ControlMessage};
use crate::error::{RelayError, Result};
use crate::transport;
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// Room commands coming from the supervisor.
///
/// Called from the session's read task, one at a time, in arrival order.
pub trait RoomCommands: Send + 'static {
    /// Start relaying `room_id`.
    fn on_room_open(&mut self, room_id: u64, session: &SessionHandle);

    /// Stop relaying `room_id`.
    fn on_room_close(&mut self, room_id: u64, session: &SessionHandle);

    /// The control link ended.
    fn on_supervisor_disconnected(&mut self) {}
}

/// Cloneable sender for room events toward the supervisor.
///
/// Methods never wait: a full outbound queue is reported as
/// [`RelayError::Backpressure`] and the event is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    writer: WriterHandle,
}

impl SessionHandle {
    /// Relay one room message.
    ///
    /// `message` is only borrowed for the duration of the call; it is copied
    /// into the outbound frame.
    pub fn on_message(&self, room_id: u64, message: &[u8]) -> Result<()> {
        self.queue(&ControlMessage::RoomMessage {
            room_id,
            payload: Bytes::copy_from_slice(message),
        })
    }

    /// Report that the connection to `room_id` failed.
    pub fn on_room_failed(&self, room_id: u64) -> Result<()> {
        self.queue(&ControlMessage::RoomFailed { room_id })
    }

    /// Queue an arbitrary control message.
    pub fn queue(&self, message: &ControlMessage) -> Result<()> {
        let frame = OutboundFrame::new(message.encode()?)?;
        self.writer.try_send(frame)
    }

    /// Whether the link's writer has exited.
    pub fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    /// Frames waiting to be written.
    pub fn pending_frames(&self) -> usize {
        self.writer.pending_count()
    }
}

/// Builder for a worker session.
pub struct SessionBuilder {
    config: WorkerConfig,
}

impl SessionBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::default(),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: WorkerConfig) -> Self {
        Self { config }
    }

    /// Rooms announced in `Hello`.
    pub fn max_rooms(mut self, max_rooms: u32) -> Self {
        self.config.max_rooms = max_rooms;
        self
    }

    /// Control-link read buffer.
    ///
    /// Default: 128 KB
    pub fn read_buffer(mut self, size: usize) -> Self {
        self.config.read_buffer = size;
        self
    }

    /// Largest accepted inbound control payload.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Maximum pending outbound frames.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.config.writer.max_pending_frames = limit;
        self
    }

    /// Writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.config.writer.channel_capacity = capacity;
        self
    }

    /// Period of control-link heartbeats. Zero disables them.
    ///
    /// Default: 10 seconds
    pub fn heartbeat_interval(mut self, period: Duration) -> Self {
        self.config.heartbeat_interval = period;
        self
    }

    /// How long `Hello` may wait for outbound queue space.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.config.writer.backpressure_timeout = timeout;
        self
    }

    /// Connect to the supervisor at `addr` and start the session.
    pub async fn connect<C: RoomCommands>(
        mut self,
        addr: &str,
        commands: C,
    ) -> Result<WorkerSession> {
        self.config.supervisor_addr = addr.to_string();
        WorkerSession::connect(self.config, commands).await
    }

    /// Start the session over an already connected stream.
    pub async fn start<S, C>(self, stream: S, commands: C) -> Result<WorkerSession>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        C: RoomCommands,
    {
        WorkerSession::start(stream, self.config, commands).await
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running worker control session.
pub struct WorkerSession {
    handle: SessionHandle,
    reader: JoinHandle<Result<()>>,
    heartbeat: Option<AbortHandle>,
    _writer_task: JoinHandle<Result<()>>,
}

impl WorkerSession {
    /// Create a session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Connect to `config.supervisor_addr` and start the session.
    pub async fn connect<C: RoomCommands>(config: WorkerConfig, commands: C) -> Result<Self> {
        let stream = transport::connect(config.supervisor_addr.as_str()).await?;
        tracing::info!(addr = %config.supervisor_addr, "connected to supervisor");
        let (reader, writer) = stream.into_split();
        Self::spawn(reader, writer, config, commands).await
    }

    /// Start the session over an already connected stream.
    pub async fn start<S, C>(stream: S, config: WorkerConfig, commands: C) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
        C: RoomCommands,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::spawn(reader, writer, config, commands).await
    }

    async fn spawn<R, W, C>(reader: R, writer: W, config: WorkerConfig, commands: C) -> Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        C: RoomCommands,
    {
        let (writer, writer_task) = spawn_writer_task(writer, config.writer.clone());
        let handle = SessionHandle { writer };

        let hello = ControlMessage::hello(config.max_rooms);
        handle
            .writer
            .send(OutboundFrame::new(hello.encode()?)?)
            .await?;

        let heartbeat = (!config.heartbeat_interval.is_zero()).then(|| {
            tokio::spawn(heartbeat_loop(handle.clone(), config.heartbeat_interval)).abort_handle()
        });

        let frames =
            ControlFrameBuffer::with_capacity_and_max(config.read_buffer, config.max_frame_size);
        let reader = tokio::spawn(read_loop(
            reader,
            frames,
            config.read_buffer,
            handle.clone(),
            commands,
            heartbeat.clone(),
        ));

        Ok(WorkerSession {
            handle,
            reader,
            heartbeat,
            _writer_task: writer_task,
        })
    }

    /// Handle for relaying room events.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Drop the control link.
    ///
    /// Queued frames are still flushed before the write direction is shut
    /// down, unless other [`SessionHandle`] clones keep the writer alive.
    pub fn disconnect(self) {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.abort();
        }
        self.reader.abort();
    }

    /// Wait until the supervisor closes the link or it fails.
    pub async fn wait_for_shutdown(self) -> Result<()> {
        match self.reader.await {
            Ok(result) => result,
            Err(e) => Err(RelayError::Io(std::io::Error::other(e.to_string()))),
        }
    }
}

/// Queue a `Heartbeat` every `period` until the writer goes away.
async fn heartbeat_loop(session: SessionHandle, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match session.queue(&ControlMessage::Heartbeat) {
            Ok(()) => tracing::trace!("control heartbeat queued"),
            Err(RelayError::Backpressure) => {
                tracing::debug!("outbound queue full, heartbeat skipped");
            }
            Err(e) => {
                tracing::debug!(error = %e, "heartbeat stopped");
                return;
            }
        }
    }
}

async fn read_loop<R, C>(
    mut reader: R,
    mut frames: ControlFrameBuffer,
    read_buffer: usize,
    session: SessionHandle,
    mut commands: C,
    heartbeat: Option<AbortHandle>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    C: RoomCommands,
{
    let mut buf = vec![0u8; read_buffer];

    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(RelayError::Io(e)),
        };

        let payloads = match frames.push(&buf[..n]) {
            Ok(payloads) => payloads,
            Err(e) => break Err(e),
        };

        for payload in payloads {
            dispatch(&payload, &session, &mut commands);
        }
    };

    if let Some(heartbeat) = heartbeat {
        heartbeat.abort();
    }
    match &result {
        Ok(()) => tracing::info!("supervisor closed the control link"),
        Err(e) => tracing::error!(error = %e, "control link failed"),
    }
    commands.on_supervisor_disconnected();
    result
}

fn dispatch<C: RoomCommands>(payload: &[u8], session: &SessionHandle, commands: &mut C) {
    let message = match ControlMessage::decode(payload) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(error = %e, len = payload.len(), "undecodable control message");
            return;
        }
    };

    match message {
        ControlMessage::OpenRoom { room_id } => {
            tracing::debug!(room_id, "open room");
            commands.on_room_open(room_id, session);
        }
        ControlMessage::CloseRoom { room_id } => {
            tracing::debug!(room_id, "close room");
            commands.on_room_close(room_id, session);
        }
        other => {
            tracing::warn!(message = ?other, "unexpected control message from supervisor");
        }
    }
}
