//! Structured logging schema and field name constants for attic.
//!
//! This module documents the field schema shared by every store component so
//! log queries can filter on the same keys everywhere. `tracing` macros take
//! field names as identifiers, not constants, so call sites spell these keys
//! literally; the constants pin the names for log tooling and tests.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Rollback failed, storage may be inconsistent |
//! | WARN  | Pipeline rolled back, stale index entries, unreadable trash entries |
//! | INFO  | Index loaded, content saved/deleted, attachment trashed/purged |
//! | DEBUG | Decision points (no-op saves, nothing to remove, lock registry pruning) |
//! | TRACE | Per-step pipeline progress |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event. Always `"store"` in this workspace.
pub const SUBSYSTEM: &str = "subsystem";

/// Component within the store.
/// Values: "pipeline", "transaction", "atomic_file", "attachment_store",
/// "recycle_bin", "id_index", "layout", "memory", "pg"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "save_content", "move_to_trash", "purge", "restore"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owning document reference (`wiki:Space.Page`).
pub const DOCUMENT: &str = "document";

/// Attachment file name.
pub const FILENAME: &str = "filename";

/// Numeric identifier of a deleted attachment.
pub const TRASH_ID: &str = "trash_id";

/// Filesystem path being read or written.
pub const PATH: &str = "path";

/// Description of a pipeline step.
pub const STEP: &str = "step";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Byte length of written content.
pub const SIZE: &str = "size";

/// Number of entries returned or processed.
pub const RESULT_COUNT: &str = "result_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR: &str = "error";

/// Outcome tag for operations with several success shapes.
/// Values: "already_absent", "stale_index_entry", "purged"
pub const OUTCOME: &str = "outcome";
