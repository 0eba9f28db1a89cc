//! Transport module - TCP sockets for the supervisor↔worker control link.
//!
//! Chat-service links are driven through generic `AsyncRead + AsyncWrite`
//! streams and do not depend on this module.

mod tcp;

pub use tcp::{connect, ControlListener};
