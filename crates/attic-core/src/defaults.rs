//! Centralized default constants for the attic store.
//!
//! Directory and file names here define the on-disk layout. Changing any of
//! them makes existing stores unreadable.

// =============================================================================
// DIRECTORY LAYOUT
// =============================================================================

/// Directory under the work dir holding every stored file.
pub const STORAGE_DIR_NAME: &str = "storage";

/// Directory under a document directory holding that document's own files.
/// The `~` prefix keeps it from colliding with child page names.
pub const DOCUMENT_DIR_NAME: &str = "~this";

/// Directory under `~this` holding live attachments.
pub const ATTACHMENT_DIR_NAME: &str = "attachments";

/// Directory under `~this` holding trashed attachments.
pub const DELETED_ATTACHMENT_DIR_NAME: &str = "deleted-attachments";

/// Separator between attachment name and deletion millis in a trash dir name.
pub const DELETED_ATTACHMENT_NAME_SEPARATOR: char = '-';

// =============================================================================
// FILE NAMES
// =============================================================================

/// Suffix appended to a target to form its backup path.
pub const BACKUP_FILE_SUFFIX: &str = "~bak";

/// Suffix appended to a target to form its temporary path.
pub const TEMP_FILE_SUFFIX: &str = "~tmp";

/// Suffix of the path a removed file is held at until its transaction ends.
pub const REMOVED_FILE_SUFFIX: &str = "~del";

/// Prefix for files stored at the root of the store, not under a document.
pub const GLOBAL_FILE_PREFIX: &str = "~GLOBAL_";

/// Revision archive file name within an attachment directory.
pub const ARCHIVE_FILE_NAME: &str = "~ARCHIVE.json";

/// Metadata record file name within a trash directory.
pub const DELETED_ATTACHMENT_METADATA_FILE_NAME: &str = "~DELETED_ATTACH_METADATA.json";

/// Global file name of the deleted attachment id→path index.
pub const DELETED_ATTACHMENT_ID_MAPPINGS_NAME: &str = "DELETED_ATTACHMENT_ID_MAPPINGS.json";

// =============================================================================
// FORMATS
// =============================================================================

/// Format version written into archive, metadata, and index files.
pub const FORMAT_VERSION: u32 = 1;

/// Version assigned to an attachment that has never been saved.
pub const INITIAL_ATTACHMENT_VERSION: &str = "1.1";

// =============================================================================
// RUNTIME
// =============================================================================

/// Default work directory when `ATTIC_WORK_DIR` is unset.
pub const WORK_DIR: &str = "./data";

/// Number of lock registry entries after which dead entries are swept.
pub const LOCK_REGISTRY_PRUNE_THRESHOLD: usize = 256;
