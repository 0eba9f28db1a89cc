//! # danmaku-relay
//!
//! Building blocks for a pool of workers that hold many livestream chat
//! connections and relay chat events to a supervisor.
//!
//! ## Architecture
//!
//! - **Chat links** (worker ↔ chat service): 16-byte big-endian packet
//!   header, reassembled from arbitrary read chunks by the stream framer
//! - **Control link** (worker ↔ supervisor): 4-byte length prefix around
//!   MessagePack [`ControlMessage`](control::ControlMessage)s
//! - **Registry** (supervisor): accepts workers, assigns random ids, queues
//!   writes per connection and drives a periodic tick
//!
//! ## Example
//!
//! ```ignore
//! use danmaku_relay::registry::Registry;
//! use danmaku_relay::worker::WorkerSession;
//!
//! let registry = Registry::bind("127.0.0.1:9090", Default::default(), policy).await?;
//! let session = WorkerSession::builder()
//!     .max_rooms(256)
//!     .connect("127.0.0.1:9090", rooms)
//!     .await?;
//! ```

pub mod codec;
pub mod config;
pub mod control;
pub mod error;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod transport;
pub mod worker;
pub mod writer;

pub use config::{RegistryConfig, SupervisorConfig, WorkerConfig};
pub use error::{RelayError, Result};
pub use registry::{Registry, RegistryHandle, WorkerHandler, WorkerId};
pub use worker::{SessionHandle, WorkerSession};
