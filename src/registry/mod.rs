//! Supervisor-side connection registry.
//!
//! Accepts worker control links, assigns each a random 64-bit
//! [`WorkerId`], frames outbound payloads, deframes inbound ones and
//! drives a periodic tick. Room assignment and liveness policy live behind
//! [`WorkerHandler`].
//!
//! # Connection lifecycle
//!
//! `Accepted` → `Active` → removed as [`CloseReason::Disconnected`] or
//! [`CloseReason::Failed`]. A failure on one connection never touches the
//! others or the accept loop.
//!
//! Sends to a slow worker are never dropped: frames that do not fit its
//! writer queue wait in a per-connection backlog until the queue drains.
//! Only a read or write error fails the connection. `disconnect` closes the
//! socket at once and discards whatever is still queued.
//!
//! # Example
//!
//! ```ignore
//! use danmaku_relay::registry::{Registry, RegistryHandle, WorkerHandler, WorkerId};
//!
//! struct Greeter;
//!
//! impl WorkerHandler for Greeter {
//!     fn on_new_worker(&mut self, id: WorkerId, ctx: &RegistryHandle) {
//!         ctx.send(id, &b"welcome"[..]);
//!     }
//!     fn on_tick(&mut self, _ctx: &RegistryHandle) {}
//!     fn on_inbound_frame(&mut self, _id: WorkerId, _payload: bytes::Bytes, _ctx: &RegistryHandle) {}
//! }
//!
//! let registry = Registry::bind("127.0.0.1:9090", Default::default(), Greeter).await?;
//! registry.shutdown().await;
//! ```

mod connection;
mod handler;
mod reactor;

pub use handler::{CloseReason, WorkerHandler, WorkerId};
pub use reactor::{Registry, RegistryHandle};
