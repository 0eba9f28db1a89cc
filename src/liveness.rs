//! Minimal supervisor policy: drop workers that go quiet.
//!
//! Every inbound frame refreshes the worker's last activity. On each tick,
//! workers silent for longer than the threshold are disconnected. Room
//! assignment is not done here.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use crate::control::ControlMessage;
use crate::registry::{CloseReason, RegistryHandle, WorkerHandler, WorkerId};

#[derive(Debug)]
struct WorkerState {
    last_seen: Instant,
    max_rooms: Option<u32>,
    messages: u64,
}

/// Disconnects workers silent for longer than `threshold`.
#[derive(Debug)]
pub struct LivenessPolicy {
    threshold: Duration,
    workers: HashMap<WorkerId, WorkerState>,
}

impl LivenessPolicy {
    /// Create a policy that drops workers silent for longer than
    /// `threshold`. Any inbound frame, `Heartbeat` included, counts as
    /// activity.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            workers: HashMap::new(),
        }
    }

    /// Workers currently tracked.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Workers whose last activity is older than the threshold at `now`.
    fn expired(&self, now: Instant) -> Vec<WorkerId> {
        self.workers
            .iter()
            .filter(|(_, state)| now.duration_since(state.last_seen) > self.threshold)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Refresh `worker_id`'s activity with one inbound frame seen at `now`.
    fn record(&mut self, worker_id: WorkerId, payload: &[u8], now: Instant) {
        let Some(state) = self.workers.get_mut(&worker_id) else {
            return;
        };
        state.last_seen = now;

        match ControlMessage::decode(payload) {
            Ok(ControlMessage::Hello { max_rooms, version }) => {
                tracing::info!(worker_id, max_rooms, %version, "worker hello");
                state.max_rooms = Some(max_rooms);
            }
            Ok(ControlMessage::Heartbeat) => {
                tracing::trace!(worker_id, "worker heartbeat");
            }
            Ok(ControlMessage::RoomMessage { room_id, payload }) => {
                state.messages += 1;
                tracing::trace!(worker_id, room_id, len = payload.len(), "room message");
            }
            Ok(ControlMessage::RoomFailed { room_id }) => {
                tracing::warn!(worker_id, room_id, "room failed on worker");
            }
            Ok(other) => {
                tracing::warn!(worker_id, message = ?other, "unexpected control message from worker");
            }
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "undecodable control message");
            }
        }
    }
}

impl WorkerHandler for LivenessPolicy {
    fn on_new_worker(&mut self, worker_id: WorkerId, _ctx: &RegistryHandle) {
        self.workers.insert(
            worker_id,
            WorkerState {
                last_seen: Instant::now(),
                max_rooms: None,
                messages: 0,
            },
        );
    }

    fn on_tick(&mut self, ctx: &RegistryHandle) {
        for worker_id in self.expired(Instant::now()) {
            tracing::warn!(worker_id, threshold = ?self.threshold, "worker silent, disconnecting");
            self.workers.remove(&worker_id);
            ctx.disconnect(worker_id);
        }
    }

    fn on_inbound_frame(&mut self, worker_id: WorkerId, payload: Bytes, _ctx: &RegistryHandle) {
        self.record(worker_id, &payload, Instant::now());
    }

    fn on_worker_disconnected(
        &mut self,
        worker_id: WorkerId,
        reason: CloseReason,
        _ctx: &RegistryHandle,
    ) {
        if let Some(state) = self.workers.remove(&worker_id) {
            tracing::info!(
                worker_id,
                ?reason,
                max_rooms = ?state.max_rooms,
                messages = state.messages,
                "worker gone"
            );
        }
    }
}
