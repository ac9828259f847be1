//! Fixed constants for the messaging layer.
//!
//! Timeouts here are not configurable. Every socket operation on the
//! command-processing thread carries one of them; a dead peer stalls the
//! node for at most about two of these bounds.
//!
//! # Categories
//!
//! - **Timeouts**: Transport connect, write and liveness bounds
//! - **Protocol limits**: Request parser guards
//! - **Shared replies**: Reply texts reused across commands
//! - **Network**: Listener defaults

use std::time::Duration;

// ============================================================================
// Timeouts
// ============================================================================

/// Bound on establishing an outbound connection to a peer node.
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on each blocking write to a peer node.
///
/// Also applied to promoted subscriber connections so fan-out to a stuck
/// peer cannot hold up the command loop.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// Bound on waiting for the reply to a liveness probe.
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(100);

// ============================================================================
// Protocol limits
// ============================================================================

/// Maximum number of arguments in one multibulk command.
pub const MAX_MULTIBULK_ARGS: usize = 1024 * 1024;

/// Maximum length of a single bulk argument (512 MB).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Maximum length of an inline command line (64 KB).
pub const MAX_INLINE_LEN: usize = 64 * 1024;

/// Maximum nesting of `MESSAGE` payloads injected inside one another.
///
/// Deeper payloads are dropped unexecuted.
pub const MAX_INJECTION_DEPTH: usize = 16;

/// Read buffer size for socket reads.
pub const READ_BUFFER_SIZE: usize = 16 * 1024;

// ============================================================================
// Shared replies
// ============================================================================

/// Keyword sent as the liveness probe.
pub const PROBE_KEYWORD: &str = "PING";

/// Error text returned to a client whose remote subscribe probe failed.
pub const SUBSCRIBE_PROBE_ERR: &str = "ERR remote subscribe failed: peer did not answer PING";

// ============================================================================
// Network
// ============================================================================

/// Default port a node listens on.
pub const DEFAULT_PORT: u16 = 6390;
