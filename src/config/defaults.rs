//! System-wide default constants.
//!
//! Grouped by subsystem for easy discovery.

// ============================================================================
// Wire Protocol
// ============================================================================

/// Byte terminating every envelope frame on the wire.
pub const FRAME_SEPARATOR: u8 = b'\n';

/// Largest accepted envelope frame (bytes, separator excluded).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

// ============================================================================
// Network
// ============================================================================

/// Dashboard HTTP / WebSocket bind address.
pub const HTTP_ADDR: &str = "0.0.0.0:8081";

/// Machine ingest TCP bind address.
pub const INGEST_ADDR: &str = "0.0.0.0:8082";

/// Fixed delay between link client reconnect attempts (seconds).
pub const LINK_RETRY_TIMEOUT_SECS: u64 = 5;

/// Samples per sensor per update after downsampling on the link client.
pub const LINK_MAX_RATE: usize = 30;

/// Outbound envelopes buffered by the link client while connected.
pub const LINK_QUEUE_CAPACITY: usize = 256;

// ============================================================================
// Fan-out
// ============================================================================

/// Minute updates retained per sensor for late subscribers.
///
/// 60 entries = the most recent hour of minute averages.
pub const REPLAY_CAPACITY: usize = 60;

/// Per-namespace broadcast channel depth before slow subscribers lag.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Commands queued to the fan-out hub from HTTP handlers.
pub const HUB_COMMAND_CAPACITY: usize = 64;

/// WebSocket keepalive ping interval (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 30;

// ============================================================================
// Notifications
// ============================================================================

/// Minimum spacing between two anomaly notifications (seconds).
pub const NOTIFY_COOLDOWN_SECS: u64 = 60;

/// Notification topic for anomaly alerts.
pub const NOTIFY_TOPIC: &str = "anomaly";

/// HTTP timeout for webhook notification delivery (seconds).
pub const NOTIFY_HTTP_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Storage
// ============================================================================

/// Default sled database location.
pub const DB_PATH: &str = "./data/rollups.db";

/// Default raw-sample CSV log directory.
pub const RAW_LOG_DIR: &str = "./data/raw";

/// Suffixes of the four persisted rollup tables per sensor.
pub const HOUR_SUFFIX: &str = "_hour";
pub const DAY_SUFFIX: &str = "_day";
pub const MONTH_SUFFIX: &str = "_month";
pub const YEAR_SUFFIX: &str = "_year";

// ============================================================================
// Shutdown
// ============================================================================

/// Time allowed for in-flight handler tasks after the bridge closes (seconds).
pub const SHUTDOWN_GRACE_SECS: u64 = 5;
