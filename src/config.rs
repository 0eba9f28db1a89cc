//! Configuration for the supervisor, the registry and worker sessions.
//!
//! [`SupervisorConfig`] is the operator-facing command line. The plain
//! [`RegistryConfig`] and [`WorkerConfig`] structs are what the library
//! components take, so they can be built in tests without going through
//! argument parsing.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;

use crate::control::{DEFAULT_MAX_CONTROL_FRAME, LENGTH_PREFIX_SIZE};
use crate::error::{RelayError, Result};
use crate::writer::WriterConfig;

/// Default control-link read buffer (128 KB).
pub const DEFAULT_READ_BUFFER: usize = 128 * 1024;

/// Default registry tick interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5000);

/// Default supervisor address.
pub const DEFAULT_SUPERVISOR_ADDR: &str = "127.0.0.1:9090";

/// Default rooms a worker offers to hold.
pub const DEFAULT_MAX_ROOMS: u32 = 1024;

/// Default worker → supervisor heartbeat period. Well under the default
/// 40 s silence threshold.
pub const DEFAULT_CONTROL_HEARTBEAT: Duration = Duration::from_secs(10);

/// Supervisor command line.
#[derive(Parser, Debug, Clone)]
#[command(name = "relay-supervisor")]
#[command(author, version, about = "Supervises a pool of chat relay workers", long_about = None)]
pub struct SupervisorConfig {
    /// Address workers connect to
    #[arg(short, long, default_value = DEFAULT_SUPERVISOR_ADDR)]
    pub listen: SocketAddr,

    /// URL the room list is fetched from
    #[arg(long, default_value = "http://localhost:6161/")]
    pub room_list_update_url: String,

    /// Room list refresh interval, in minutes
    #[arg(short = 'u', long, default_value_t = 30)]
    pub room_list_update_interval: u64,

    /// Room list request timeout, in seconds
    #[arg(long, default_value_t = 30)]
    pub room_list_update_timeout_sec: u64,

    /// Worker receive timeout, in seconds
    #[arg(short = 't', long, default_value_t = 30)]
    pub worker_receive_timeout: u64,

    /// Registry tick interval, in milliseconds
    #[arg(short = 'c', long, default_value_t = 5000)]
    pub check_interval_ms: u64,

    /// Lower bound accepted for --check-interval-ms
    #[arg(short = 'C', long, default_value_t = 2000)]
    pub min_check_interval_ms: u64,

    /// Control-link read buffer, in bytes
    #[arg(short = 'b', long, default_value_t = DEFAULT_READ_BUFFER)]
    pub read_buffer: usize,

    /// Silence after which a worker is considered dead, in seconds
    #[arg(short = 'i', long, default_value_t = 40)]
    pub worker_interval_threshold_sec: u64,

    /// Penalty applied to a failing worker, in minutes
    #[arg(short = 'p', long, default_value_t = 5)]
    pub worker_penalty_min: u64,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl SupervisorConfig {
    /// Reject option combinations the supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        let nonzero = [
            ("room-list-update-interval", self.room_list_update_interval),
            ("room-list-update-timeout-sec", self.room_list_update_timeout_sec),
            ("worker-receive-timeout", self.worker_receive_timeout),
            ("check-interval-ms", self.check_interval_ms),
            ("worker-interval-threshold-sec", self.worker_interval_threshold_sec),
        ];
        if let Some((name, _)) = nonzero.iter().find(|(_, v)| *v == 0) {
            return Err(RelayError::Config(format!("{name} must be greater than zero")));
        }

        if self.check_interval_ms < self.min_check_interval_ms {
            return Err(RelayError::Config(format!(
                "check-interval-ms ({}) is below min-check-interval-ms ({})",
                self.check_interval_ms, self.min_check_interval_ms
            )));
        }

        if self.read_buffer <= LENGTH_PREFIX_SIZE {
            return Err(RelayError::Config(format!(
                "read-buffer must be larger than {LENGTH_PREFIX_SIZE} bytes"
            )));
        }

        Ok(())
    }

    /// Registry tick interval.
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Room list refresh interval.
    pub fn room_list_update_interval(&self) -> Duration {
        Duration::from_secs(self.room_list_update_interval * 60)
    }

    /// Worker receive timeout.
    pub fn worker_receive_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_receive_timeout)
    }

    /// Silence threshold for the liveness policy.
    pub fn worker_interval_threshold(&self) -> Duration {
        Duration::from_secs(self.worker_interval_threshold_sec)
    }

    /// Failure penalty.
    pub fn worker_penalty(&self) -> Duration {
        Duration::from_secs(self.worker_penalty_min * 60)
    }

    /// Registry settings derived from the command line.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            tick_interval: self.check_interval(),
            read_buffer: self.read_buffer,
            ..RegistryConfig::default()
        }
    }
}

/// Settings for the supervisor-side connection registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between `on_tick` calls.
    pub tick_interval: Duration,
    /// Per-connection read buffer.
    pub read_buffer: usize,
    /// Largest accepted inbound control payload.
    pub max_frame_size: usize,
    /// Per-connection outbound queue.
    pub writer: WriterConfig,
    /// Fixed seed for worker identifiers. `None` seeds from the OS.
    pub id_seed: Option<u64>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_CHECK_INTERVAL,
            read_buffer: DEFAULT_READ_BUFFER,
            max_frame_size: DEFAULT_MAX_CONTROL_FRAME,
            writer: WriterConfig::default(),
            id_seed: None,
        }
    }
}

/// Settings for a worker's control session.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Supervisor control address.
    pub supervisor_addr: String,
    /// Control-link read buffer.
    pub read_buffer: usize,
    /// Rooms announced in `Hello`.
    pub max_rooms: u32,
    /// Largest accepted inbound control payload.
    pub max_frame_size: usize,
    /// Period of `Heartbeat` messages to the supervisor. Zero disables them.
    pub heartbeat_interval: Duration,
    /// Outbound queue.
    pub writer: WriterConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            supervisor_addr: DEFAULT_SUPERVISOR_ADDR.to_string(),
            read_buffer: DEFAULT_READ_BUFFER,
            max_rooms: DEFAULT_MAX_ROOMS,
            max_frame_size: DEFAULT_MAX_CONTROL_FRAME,
            heartbeat_interval: DEFAULT_CONTROL_HEARTBEAT,
            writer: WriterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> SupervisorConfig {
        let mut argv = vec!["relay-supervisor"];
        argv.extend_from_slice(args);
        SupervisorConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.listen, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.room_list_update_url, "http://localhost:6161/");
        assert_eq!(config.room_list_update_interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.worker_receive_timeout(), Duration::from_secs(30));
        assert_eq!(config.check_interval(), Duration::from_millis(5000));
        assert_eq!(config.min_check_interval_ms, 2000);
        assert_eq!(config.read_buffer, 128 * 1024);
        assert_eq!(config.worker_interval_threshold(), Duration::from_secs(40));
        assert_eq!(config.worker_penalty(), Duration::from_secs(5 * 60));
        assert!(!config.verbose);
        config.validate().unwrap();
    }

    #[test]
    fn test_short_flags() {
        let config = parse(&["-c", "3000", "-C", "1000", "-b", "4096", "-i", "10", "-v"]);
        assert_eq!(config.check_interval_ms, 3000);
        assert_eq!(config.min_check_interval_ms, 1000);
        assert_eq!(config.read_buffer, 4096);
        assert_eq!(config.worker_interval_threshold_sec, 10);
        assert!(config.verbose);
        config.validate().unwrap();
    }

    #[test]
    fn test_check_below_minimum_rejected() {
        let config = parse(&["--check-interval-ms", "1000"]);
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = parse(&["--worker-interval-threshold-sec", "0"]);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("worker-interval-threshold-sec"));
    }

    #[test]
    fn test_tiny_read_buffer_rejected() {
        let config = parse(&["-b", "4"]);
        assert!(matches!(config.validate(), Err(RelayError::Config(_))));
    }

    #[test]
    fn test_non_numeric_flag_is_parse_error() {
        let result = SupervisorConfig::try_parse_from(["relay-supervisor", "-c", "soon"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_worker_heartbeat_beats_default_threshold() {
        let worker = WorkerConfig::default();
        let supervisor = parse(&[]);
        assert!(!worker.heartbeat_interval.is_zero());
        assert!(worker.heartbeat_interval * 2 < supervisor.worker_interval_threshold());
    }

    #[test]
    fn test_registry_config_from_cli() {
        let config = parse(&["-c", "2500", "-b", "8192"]);
        let registry = config.registry_config();
        assert_eq!(registry.tick_interval, Duration::from_millis(2500));
        assert_eq!(registry.read_buffer, 8192);
        assert_eq!(registry.max_frame_size, DEFAULT_MAX_CONTROL_FRAME);
        assert!(registry.id_seed.is_none());
    }
}
