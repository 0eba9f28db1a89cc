//! One chat-service room link.
//!
//! A [`RoomConnection`] sends the join-room packet, keeps the link alive
//! with heartbeats and feeds every received byte through a
//! [`StreamBuffer`]. Decoded packets go to a [`PacketSink`] as borrowed
//! views; payloads are not interpreted or decompressed here.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::SessionHandle;
use crate::error::{RelayError, Result};
use crate::protocol::{
    build_heartbeat, build_join_room, OpCode, PacketSink, PacketView, ProtocolVersion,
    StreamBuffer,
};

/// Interval between heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default stream buffer for one room (128 KB).
pub const DEFAULT_ROOM_BUFFER: usize = 128 * 1024;

/// Settings for a room link.
#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Protocol version requested in the join-room body.
    pub protocol_version: ProtocolVersion,
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// Capacity of the stream buffer.
    pub read_buffer: usize,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            protocol_version: ProtocolVersion::ZlibCompressed,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            read_buffer: DEFAULT_ROOM_BUFFER,
        }
    }
}

/// A chat-service link for a single room.
pub struct RoomConnection<S> {
    room_id: u64,
    stream: S,
    options: RoomOptions,
}

impl<S> RoomConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap a connected stream.
    pub fn new(room_id: u64, stream: S, options: RoomOptions) -> Self {
        Self {
            room_id,
            stream,
            options,
        }
    }

    /// Room this link serves.
    pub fn room_id(&self) -> u64 {
        self.room_id
    }

    /// Join the room and pump packets into `sink` until the link ends.
    ///
    /// Never returns `Ok`: an orderly close by the service is reported as
    /// [`RelayError::ConnectionClosed`].
    pub async fn run<P>(self, sink: &mut P) -> Result<()>
    where
        P: PacketSink + ?Sized,
    {
        let room_id = self.room_id;
        let (mut reader, mut writer) = tokio::io::split(self.stream);

        writer
            .write_all(&build_join_room(room_id, self.options.protocol_version)?)
            .await?;
        writer.flush().await?;
        tracing::debug!(room_id, "join-room sent");

        let period = self.options.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buffer = StreamBuffer::with_capacity(self.options.read_buffer);

        loop {
            tokio::select! {
                _ = heartbeat.tick() => {
                    writer.write_all(&build_heartbeat()).await?;
                    writer.flush().await?;
                }
                read = reader.read(buffer.write_slot()) => {
                    let n = read?;
                    if n == 0 {
                        return Err(RelayError::ConnectionClosed);
                    }
                    if let Err(e) = buffer.advance(n, sink) {
                        if e.is_malformed() {
                            tracing::warn!(room_id, error = %e, "malformed packet from chat service");
                        }
                        return Err(e);
                    }
                }
            }
        }
    }

    /// Run the link and relay every chat message to the supervisor.
    ///
    /// When the link ends the failure is reported with
    /// [`SessionHandle::on_room_failed`] and the error is returned.
    pub async fn relay(self, session: SessionHandle) -> Result<()> {
        let room_id = self.room_id;
        let mut relay = RoomRelay::new(room_id, session.clone());

        let err = match self.run(&mut relay).await {
            Ok(()) => RelayError::ConnectionClosed,
            Err(e) => e,
        };

        tracing::info!(room_id, error = %err, "room link ended");
        if let Err(e) = session.on_room_failed(room_id) {
            tracing::warn!(room_id, error = %e, "could not report room failure");
        }
        Err(err)
    }
}

/// [`PacketSink`] that forwards chat messages over the control session.
///
/// Only `json_message` packets are relayed; heartbeat replies update the
/// last seen popularity and join acknowledgements are logged.
pub struct RoomRelay {
    room_id: u64,
    session: SessionHandle,
    popularity: Option<u32>,
    dropped: u64,
}

impl RoomRelay {
    /// Relay for `room_id` through `session`.
    pub fn new(room_id: u64, session: SessionHandle) -> Self {
        Self {
            room_id,
            session,
            popularity: None,
            dropped: 0,
        }
    }

    /// Popularity from the latest heartbeat reply.
    pub fn popularity(&self) -> Option<u32> {
        self.popularity
    }

    /// Messages that could not be queued toward the supervisor.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl PacketSink for RoomRelay {
    fn on_packet(&mut self, packet: PacketView<'_>) {
        match packet.op_code() {
            OpCode::JsonMessage => {
                if let Err(e) = self.session.on_message(self.room_id, packet.payload) {
                    self.dropped += 1;
                    tracing::debug!(room_id = self.room_id, error = %e, "room message dropped");
                }
            }
            OpCode::HeartbeatResp => self.popularity = packet.popularity(),
            OpCode::JoinRoomResp => tracing::debug!(room_id = self.room_id, "joined room"),
            op => tracing::trace!(room_id = self.room_id, ?op, "ignored packet"),
        }
    }
}
