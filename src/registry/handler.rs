//! Policy capability injected into the registry.

use bytes::Bytes;

use super::RegistryHandle;

/// Worker identifier assigned on accept.
pub type WorkerId = u64;

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit `disconnect`, orderly peer close, or shutdown.
    Disconnected,
    /// Read or write failure on the connection.
    Failed,
}

/// Callbacks the registry drives from its reactor task.
///
/// All methods run on the reactor, one at a time. `ctx` queues commands
/// back to the same reactor; they take effect after the callback returns.
pub trait WorkerHandler: Send + 'static {
    /// A connection was accepted and assigned `worker_id`.
    fn on_new_worker(&mut self, worker_id: WorkerId, ctx: &RegistryHandle);

    /// Periodic beat. Liveness decisions belong here.
    fn on_tick(&mut self, ctx: &RegistryHandle);

    /// One complete control payload from `worker_id`.
    fn on_inbound_frame(&mut self, worker_id: WorkerId, payload: Bytes, ctx: &RegistryHandle);

    /// `worker_id` was removed from the registry.
    fn on_worker_disconnected(
        &mut self,
        _worker_id: WorkerId,
        _reason: CloseReason,
        _ctx: &RegistryHandle,
    ) {
    }
}
