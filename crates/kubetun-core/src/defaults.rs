//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

use std::time::Duration;

// ============================================================================
// Dial / retry defaults
// ============================================================================

/// Per-hop transport dial timeout.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(15);
/// Proxy handshake timeout on an established hop connection.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of whole-dial attempts. A chain never attempts fewer.
pub const DEFAULT_RETRIES: usize = 1;

// ============================================================================
// Node health defaults
// ============================================================================

/// Default consecutive-failure threshold before a node is considered down.
pub const DEFAULT_MAX_FAILS: u32 = 3;
/// Default window after which a node's failure count resets.
pub const DEFAULT_FAIL_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Relay defaults
// ============================================================================

/// Default relay buffer size per direction.
pub const DEFAULT_RELAY_BUFFER_SIZE: usize = 32768;
/// Default idle timeout for a relayed session.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);
/// Default UDP association timeout.
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Device defaults
// ============================================================================

/// Interface name used on platforms where we pick the name.
pub const DEFAULT_TUN_NAME: &str = "wg1";
/// Default interface MTU.
pub const DEFAULT_MTU: u32 = 1420;
/// Largest IP packet the device read path accepts.
pub const MAX_PACKET_SIZE: usize = 65535;
/// Upper bound on how long `Device::close` may wait for a parked reader.
pub const CLOSE_WAIT: Duration = Duration::from_secs(2);
