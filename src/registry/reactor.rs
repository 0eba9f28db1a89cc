//! The registry reactor and its handle.
//!
//! One tokio task owns the `WorkerId → WorkerEntry` map. Accepts, connection
//! events, handle commands and the tick timer are all multiplexed in a single
//! `select!` loop, so the map is only ever touched from that task and needs
//! no lock.
//!
//! ```text
//! ControlListener ──accept──┐
//! Reader tasks ──ConnEvent──┼──► reactor (map owner) ──► WorkerHandler
//! RegistryHandle ──Command──┤            │
//! Tick sleep ───────────────┘            └──► WriterHandle per worker
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::pin::Pin;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Sleep};

use super::connection::{
    read_loop, wait_writable, watch_writer, ConnEvent, ConnectionState, WorkerEntry,
};
use super::{CloseReason, WorkerHandler, WorkerId};
use crate::config::RegistryConfig;
use crate::control::ControlFrameBuffer;
use crate::error::{RelayError, Result};
use crate::transport::ControlListener;
use crate::writer::{spawn_writer_task, OutboundFrame};

/// Capacity of the connection → reactor event queue.
const EVENT_QUEUE_CAPACITY: usize = 1024;

enum Command {
    Send { worker_id: WorkerId, payload: Bytes },
    Disconnect { worker_id: WorkerId },
    Shutdown { done: oneshot::Sender<()> },
}

/// Cloneable handle to a running registry.
///
/// `send` and `disconnect` never block: they queue a command that the
/// reactor applies in order.
#[derive(Clone, Debug)]
pub struct RegistryHandle {
    commands: mpsc::UnboundedSender<Command>,
    local_addr: SocketAddr,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Send { worker_id, payload } => f
                .debug_struct("Send")
                .field("worker_id", worker_id)
                .field("len", &payload.len())
                .finish(),
            Command::Disconnect { worker_id } => f
                .debug_struct("Disconnect")
                .field("worker_id", worker_id)
                .finish(),
            Command::Shutdown { .. } => f.write_str("Shutdown"),
        }
    }
}

impl RegistryHandle {
    /// Frame `payload` and queue it for `worker_id`.
    ///
    /// Unknown or already removed workers are a silent no-op. Frames for one
    /// worker are written in call order however slowly it reads.
    pub fn send(&self, worker_id: WorkerId, payload: impl Into<Bytes>) {
        let command = Command::Send {
            worker_id,
            payload: payload.into(),
        };
        if self.commands.send(command).is_err() {
            tracing::debug!(worker_id, "registry stopped, send dropped");
        }
    }

    /// Remove `worker_id`, shut down both directions and close the socket.
    /// Frames not yet written are discarded. Best effort.
    pub fn disconnect(&self, worker_id: WorkerId) {
        if self
            .commands
            .send(Command::Disconnect { worker_id })
            .is_err()
        {
            tracing::debug!(worker_id, "registry stopped, disconnect dropped");
        }
    }

    /// Stop accepting and ticking, disconnect every worker and wait for the
    /// reactor to exit.
    pub async fn shutdown(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(Command::Shutdown { done }).is_ok() {
            let _ = wait.await;
        }
    }

    /// Whether the reactor has exited.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    /// Address workers connect to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Supervisor-side connection registry.
pub struct Registry;

impl Registry {
    /// Bind a listener on `addr` and start the reactor.
    ///
    /// # Errors
    ///
    /// [`RelayError::ResourceInit`] if the listener cannot be bound.
    pub async fn bind<A, H>(addr: A, config: RegistryConfig, handler: H) -> Result<RegistryHandle>
    where
        A: ToSocketAddrs,
        H: WorkerHandler,
    {
        let listener = ControlListener::bind(addr).await?;
        Self::start(listener, config, handler)
    }

    /// Start the reactor on an existing listener. Must be called from within
    /// a tokio runtime.
    pub fn start<H: WorkerHandler>(
        listener: ControlListener,
        config: RegistryConfig,
        handler: H,
    ) -> Result<RegistryHandle> {
        let local_addr = listener.local_addr()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);

        let handle = RegistryHandle {
            commands: commands_tx,
            local_addr,
        };

        let rng = match config.id_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let reactor = Reactor {
            config,
            handler,
            ctx: handle.clone(),
            workers: HashMap::new(),
            rng,
            next_serial: 0,
            events_tx,
        };

        tracing::info!(addr = %local_addr, "registry listening");
        tokio::spawn(reactor.run(listener, commands_rx, events_rx));

        Ok(handle)
    }
}

/// Draw identifiers from `rng` until one is not `taken`.
pub(crate) fn assign_worker_id<R, F>(rng: &mut R, taken: F) -> WorkerId
where
    R: RngCore + ?Sized,
    F: Fn(WorkerId) -> bool,
{
    loop {
        let id = rng.next_u64();
        if !taken(id) {
            return id;
        }
        tracing::warn!(worker_id = id, "worker id collision, regenerating");
    }
}

struct Reactor<H> {
    config: RegistryConfig,
    handler: H,
    ctx: RegistryHandle,
    workers: HashMap<WorkerId, WorkerEntry>,
    rng: StdRng,
    next_serial: u64,
    events_tx: mpsc::Sender<ConnEvent>,
}

impl<H: WorkerHandler> Reactor<H> {
    async fn run(
        mut self,
        listener: ControlListener,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::Receiver<ConnEvent>,
    ) {
        let mut tick: Pin<Box<Sleep>> = Box::pin(tokio::time::sleep(self.config.tick_interval));

        let done = loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer),
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                },

                Some(event) = events.recv() => self.on_event(event),

                command = commands.recv() => match command {
                    Some(Command::Send { worker_id, payload }) => self.send(worker_id, payload),
                    Some(Command::Disconnect { worker_id }) => {
                        self.remove(worker_id, CloseReason::Disconnected);
                    }
                    Some(Command::Shutdown { done }) => break Some(done),
                    // The reactor holds a handle itself, so this only happens
                    // if the channel is torn down externally.
                    None => break None,
                },

                () = tick.as_mut() => {
                    self.handler.on_tick(&self.ctx);
                    tick.as_mut().reset(Instant::now() + self.config.tick_interval);
                }
            }
        };

        drop(listener);
        let ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        for worker_id in ids {
            self.remove(worker_id, CloseReason::Disconnected);
        }
        tracing::info!("registry stopped");

        // Close the command queue before acknowledging so handles observe
        // `is_closed` once `shutdown` returns.
        drop(commands);
        if let Some(done) = done {
            let _ = done.send(());
        }
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        let workers = &self.workers;
        let worker_id = assign_worker_id(&mut self.rng, |id| workers.contains_key(&id));
        let serial = self.next_serial;
        self.next_serial += 1;

        let (read_half, write_half) = stream.into_split();
        let (writer, writer_task) = spawn_writer_task(write_half, self.config.writer.clone());
        let writer_abort = writer_task.abort_handle();
        tokio::spawn(watch_writer(
            writer_task,
            worker_id,
            serial,
            self.events_tx.clone(),
        ));

        let frames = ControlFrameBuffer::with_capacity_and_max(
            self.config.read_buffer,
            self.config.max_frame_size,
        );
        let reader = tokio::spawn(read_loop(
            read_half,
            worker_id,
            serial,
            frames,
            self.config.read_buffer,
            self.events_tx.clone(),
        ));

        self.workers.insert(
            worker_id,
            WorkerEntry::new(serial, writer, reader, writer_abort),
        );
        tracing::info!(worker_id, %peer, "worker connected");

        self.handler.on_new_worker(worker_id, &self.ctx);

        if let Some(entry) = self.workers.get_mut(&worker_id) {
            entry.state = ConnectionState::Active;
        }
    }

    fn on_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Frame {
                worker_id,
                serial,
                payload,
            } => {
                if !self.is_current(worker_id, serial) {
                    return;
                }
                self.handler.on_inbound_frame(worker_id, payload, &self.ctx);
            }
            ConnEvent::Closed {
                worker_id,
                serial,
                error,
            } => {
                if !self.is_current(worker_id, serial) {
                    return;
                }
                let reason = match error {
                    None => {
                        tracing::info!(worker_id, "worker closed the connection");
                        CloseReason::Disconnected
                    }
                    Some(e) => {
                        tracing::warn!(worker_id, error = %e, "worker connection failed");
                        CloseReason::Failed
                    }
                };
                self.remove(worker_id, reason);
            }
            ConnEvent::Writable { worker_id, serial } => {
                if !self.is_current(worker_id, serial) {
                    return;
                }
                if let Some(entry) = self.workers.get_mut(&worker_id) {
                    entry.drain = None;
                }
                self.flush_backlog(worker_id);
            }
        }
    }

    fn is_current(&self, worker_id: WorkerId, serial: u64) -> bool {
        self.workers
            .get(&worker_id)
            .is_some_and(|entry| entry.serial == serial)
    }

    fn send(&mut self, worker_id: WorkerId, payload: Bytes) {
        let Some(entry) = self.workers.get_mut(&worker_id) else {
            tracing::debug!(worker_id, "send to unknown worker ignored");
            return;
        };

        let frame = match OutboundFrame::new(payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "control frame dropped");
                return;
            }
        };

        // Keep order behind frames already waiting.
        if !entry.backlog.is_empty() {
            entry.backlog.push_back(frame);
            return;
        }

        match entry.writer.try_send(frame.clone()) {
            Ok(()) => {}
            Err(RelayError::Backpressure) => {
                entry.backlog.push_back(frame);
                tracing::debug!(worker_id, "writer queue full, backlogging");
                self.arm_drain(worker_id);
            }
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "queueing control frame failed");
                self.remove(worker_id, CloseReason::Failed);
            }
        }
    }

    /// Move backlogged frames into the writer queue until it fills again.
    fn flush_backlog(&mut self, worker_id: WorkerId) {
        let Some(entry) = self.workers.get_mut(&worker_id) else {
            return;
        };

        while let Some(frame) = entry.backlog.pop_front() {
            match entry.writer.try_send(frame.clone()) {
                Ok(()) => {}
                Err(RelayError::Backpressure) => {
                    entry.backlog.push_front(frame);
                    self.arm_drain(worker_id);
                    return;
                }
                Err(e) => {
                    tracing::warn!(worker_id, error = %e, "flushing backlog failed");
                    self.remove(worker_id, CloseReason::Failed);
                    return;
                }
            }
        }
        tracing::debug!(worker_id, "backlog flushed");
    }

    fn arm_drain(&mut self, worker_id: WorkerId) {
        let Some(entry) = self.workers.get_mut(&worker_id) else {
            return;
        };
        if entry.drain.is_some() {
            return;
        }

        let task = tokio::spawn(wait_writable(
            entry.writer.clone(),
            worker_id,
            entry.serial,
            self.events_tx.clone(),
        ));
        entry.drain = Some(task.abort_handle());
    }

    fn remove(&mut self, worker_id: WorkerId, reason: CloseReason) {
        let Some(entry) = self.workers.remove(&worker_id) else {
            tracing::debug!(worker_id, "disconnect of unknown worker ignored");
            return;
        };

        tracing::debug!(worker_id, state = ?entry.state, ?reason, "removing worker");
        entry.close();
        self.handler.on_worker_disconnected(worker_id, reason, &self.ctx);
    }
}
