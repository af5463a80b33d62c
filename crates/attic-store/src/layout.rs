//! On-disk layout of live attachments, trash directories, and global files.
//!
//! ```text
//! <root>/<wiki>/<space>.../<page>/~this/attachments/<name>/<name>           content
//! <root>/<wiki>/<space>.../<page>/~this/attachments/<name>/~ARCHIVE.json    archive
//! <root>/<wiki>/<space>.../<page>/~this/deleted-attachments/<name>-<millis>/
//! <root>/~GLOBAL_<name>                                                     global file
//! ```
//!
//! Every path segment is URL-encoded so arbitrary names map to safe file names.
//! `~` is escaped too: names starting with it are reserved for the store's own
//! files, and `~`-suffixes mark temporary, backup, and held copies.

use std::borrow::Cow;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use attic_core::defaults::{
    ARCHIVE_FILE_NAME, ATTACHMENT_DIR_NAME, BACKUP_FILE_SUFFIX, DELETED_ATTACHMENT_DIR_NAME,
    DELETED_ATTACHMENT_METADATA_FILE_NAME, DELETED_ATTACHMENT_NAME_SEPARATOR, DOCUMENT_DIR_NAME,
    GLOBAL_FILE_PREFIX, REMOVED_FILE_SUFFIX, TEMP_FILE_SUFFIX,
};
use attic_core::{DocumentReference, Error, FileLock, LockRegistry, Result, StoreConfig};

use crate::atomic_file::with_suffix;

/// Deleted attachments of a document: attachment name → deletion time → files.
pub type DeletedAttachmentsByName = BTreeMap<String, BTreeMap<DateTime<Utc>, DeletedAttachmentFiles>>;

/// Files of one trashed attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedAttachmentFiles {
    pub dir: PathBuf,
    pub filename: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedAttachmentFiles {
    pub fn content_file(&self) -> PathBuf {
        self.dir.join(&*encode_segment(&self.filename))
    }

    pub fn archive_file(&self) -> PathBuf {
        self.dir.join(ARCHIVE_FILE_NAME)
    }

    pub fn metadata_file(&self) -> PathBuf {
        self.dir.join(DELETED_ATTACHMENT_METADATA_FILE_NAME)
    }
}

/// Maps domain objects to file locations and hands out per-file locks.
#[async_trait]
pub trait StorageLayout: Send + Sync {
    fn storage_root(&self) -> &Path;

    /// Directory holding a live attachment's content and archive.
    fn attachment_dir(&self, document: &DocumentReference, filename: &str) -> PathBuf;

    fn attachment_content_file(&self, document: &DocumentReference, filename: &str) -> PathBuf {
        self.attachment_dir(document, filename)
            .join(&*encode_segment(filename))
    }

    fn attachment_archive_file(&self, document: &DocumentReference, filename: &str) -> PathBuf {
        self.attachment_dir(document, filename)
            .join(ARCHIVE_FILE_NAME)
    }

    /// Trash location for one deletion of `filename`.
    fn deleted_attachment_dir(
        &self,
        document: &DocumentReference,
        filename: &str,
        deleted_at: DateTime<Utc>,
    ) -> DeletedAttachmentFiles;

    /// Resolve a trash directory from its path relative to the storage root.
    fn deleted_attachment_files(&self, relative: &str) -> Result<DeletedAttachmentFiles>;

    /// Every trash directory under `document`, grouped by attachment name and
    /// deletion time.
    async fn deleted_attachments_for_document(
        &self,
        document: &DocumentReference,
    ) -> Result<DeletedAttachmentsByName>;

    fn temp_file(&self, target: &Path) -> PathBuf {
        with_suffix(target, TEMP_FILE_SUFFIX)
    }

    fn backup_file(&self, target: &Path) -> PathBuf {
        with_suffix(target, BACKUP_FILE_SUFFIX)
    }

    /// Where a removed file waits for its transaction to finish.
    fn holding_file(&self, target: &Path) -> PathBuf {
        with_suffix(target, REMOVED_FILE_SUFFIX)
    }

    /// File stored at the root of the store rather than under a document.
    fn global_file(&self, name: &str) -> PathBuf {
        let encoded = format!("{GLOBAL_FILE_PREFIX}{}", encode_segment(name));
        self.storage_root().join(encoded)
    }

    fn lock_for(&self, path: &Path) -> FileLock;

    /// `path` relative to the storage root, `/`-separated.
    fn relative_to_root(&self, path: &Path) -> Result<String> {
        let relative = path.strip_prefix(self.storage_root()).map_err(|_| {
            Error::Internal(format!(
                "{} is outside the storage root {}",
                path.display(),
                self.storage_root().display()
            ))
        })?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Ok(parts.join("/"))
    }
}

/// Layout rooted at `<work_dir>/storage`.
#[derive(Debug)]
pub struct DefaultStorageLayout {
    root: PathBuf,
    locks: LockRegistry,
    prune_empty_dirs: bool,
}

impl DefaultStorageLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: LockRegistry::new(),
            prune_empty_dirs: true,
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            root: config.storage_root(),
            locks: LockRegistry::new(),
            prune_empty_dirs: config.prune_empty_dirs,
        }
    }

    fn document_dir(&self, document: &DocumentReference) -> PathBuf {
        let mut dir = self.root.join(&*encode_segment(&document.wiki));
        for space in &document.spaces {
            dir.push(&*encode_segment(space));
        }
        dir.push(&*encode_segment(&document.page));
        dir.push(DOCUMENT_DIR_NAME);
        dir
    }

    fn trash_root(&self, document: &DocumentReference) -> PathBuf {
        self.document_dir(document).join(DELETED_ATTACHMENT_DIR_NAME)
    }

    /// Create the storage root and prune empty directories left behind by
    /// earlier deletes and purges.
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::file_io(&self.root, e))?;

        if self.prune_empty_dirs {
            let removed = prune_empty_dirs(&self.root).await?;
            info!(
                subsystem = "store",
                component = "layout",
                op = "initialize",
                path = %self.root.display(),
                removed,
                "Storage layout initialized"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl StorageLayout for DefaultStorageLayout {
    fn storage_root(&self) -> &Path {
        &self.root
    }

    fn attachment_dir(&self, document: &DocumentReference, filename: &str) -> PathBuf {
        self.document_dir(document)
            .join(ATTACHMENT_DIR_NAME)
            .join(&*encode_segment(filename))
    }

    fn deleted_attachment_dir(
        &self,
        document: &DocumentReference,
        filename: &str,
        deleted_at: DateTime<Utc>,
    ) -> DeletedAttachmentFiles {
        let dir_name = format!(
            "{}{}{}",
            encode_segment(filename),
            DELETED_ATTACHMENT_NAME_SEPARATOR,
            deleted_at.timestamp_millis()
        );
        DeletedAttachmentFiles {
            dir: self.trash_root(document).join(dir_name),
            filename: filename.to_string(),
            deleted_at,
        }
    }

    fn deleted_attachment_files(&self, relative: &str) -> Result<DeletedAttachmentFiles> {
        let relative_path = Path::new(relative);
        if relative.is_empty()
            || !relative_path
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(Error::Corrupt(format!(
                "invalid trash path '{relative}'"
            )));
        }

        let dir = self.root.join(relative_path);
        let dir_name = relative_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (filename, deleted_at) = parse_trash_dir_name(&dir_name)
            .ok_or_else(|| Error::Corrupt(format!("invalid trash directory name '{dir_name}'")))?;

        Ok(DeletedAttachmentFiles {
            dir,
            filename,
            deleted_at,
        })
    }

    async fn deleted_attachments_for_document(
        &self,
        document: &DocumentReference,
    ) -> Result<DeletedAttachmentsByName> {
        let trash_root = self.trash_root(document);
        let mut grouped = DeletedAttachmentsByName::new();

        let mut entries = match fs::read_dir(&trash_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(grouped),
            Err(e) => return Err(Error::file_io(&trash_root, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::file_io(&trash_root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map_err(|e| Error::file_io(entry.path(), e))?
                .is_dir();
            if !is_dir {
                continue;
            }

            let dir_name = entry.file_name().to_string_lossy().into_owned();
            match parse_trash_dir_name(&dir_name) {
                Some((filename, deleted_at)) => {
                    grouped.entry(filename.clone()).or_default().insert(
                        deleted_at,
                        DeletedAttachmentFiles {
                            dir: entry.path(),
                            filename,
                            deleted_at,
                        },
                    );
                }
                None => {
                    warn!(
                        subsystem = "store",
                        component = "layout",
                        path = %entry.path().display(),
                        "Skipping unrecognized trash directory"
                    );
                }
            }
        }

        Ok(grouped)
    }

    fn lock_for(&self, path: &Path) -> FileLock {
        self.locks.lock_for(path)
    }
}

/// Read `path` under its read lock. `None` when the file does not exist.
pub async fn read_if_exists(layout: &dyn StorageLayout, path: &Path) -> Result<Option<Vec<u8>>> {
    let _guard = layout.lock_for(path).read().await;
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::file_io(path, e)),
    }
}

/// URL-encode one path segment. `.` and `..` are escaped so a name can never
/// address a parent directory, and `~` so it can never collide with the
/// store's reserved file names.
pub fn encode_segment(name: &str) -> Cow<'_, str> {
    match name {
        "." => Cow::Borrowed("%2E"),
        ".." => Cow::Borrowed("%2E%2E"),
        _ => match urlencoding::encode(name) {
            Cow::Borrowed(encoded) if !encoded.contains('~') => Cow::Borrowed(encoded),
            encoded => Cow::Owned(encoded.replace('~', "%7E")),
        },
    }
}

/// Split `<encoded name>-<millis>` at the last separator.
fn parse_trash_dir_name(dir_name: &str) -> Option<(String, DateTime<Utc>)> {
    let (encoded, millis) = dir_name.rsplit_once(DELETED_ATTACHMENT_NAME_SEPARATOR)?;
    if encoded.is_empty() {
        return None;
    }
    let millis: i64 = millis.parse().ok()?;
    let deleted_at = Utc.timestamp_millis_opt(millis).single()?;
    let filename = urlencoding::decode(encoded).ok()?.into_owned();
    Some((filename, deleted_at))
}

/// Remove empty directories below `root`, deepest first. Returns the count.
async fn prune_empty_dirs(root: &Path) -> Result<usize> {
    let mut dirs = Vec::new();
    let mut queue = VecDeque::from([root.to_path_buf()]);

    while let Some(dir) = queue.pop_front() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| Error::file_io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::file_io(&dir, e))?
        {
            if entry
                .file_type()
                .await
                .map_err(|e| Error::file_io(entry.path(), e))?
                .is_dir()
            {
                queue.push_back(entry.path());
                dirs.push(entry.path());
            }
        }
    }

    let mut removed = 0;
    for dir in dirs.iter().rev() {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| Error::file_io(dir, e))?;
        let empty = entries
            .next_entry()
            .await
            .map_err(|e| Error::file_io(dir, e))?
            .is_none();
        if empty {
            fs::remove_dir(dir)
                .await
                .map_err(|e| Error::file_io(dir, e))?;
            debug!(path = %dir.display(), "layout: removed empty directory");
            removed += 1;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc() -> DocumentReference {
        DocumentReference::new("xwiki", ["Main", "Sub Space"], "Web/Home")
    }

    #[test]
    fn test_attachment_paths() {
        let layout = DefaultStorageLayout::new("/store");
        assert_eq!(
            layout.attachment_content_file(&doc(), "my file.txt"),
            PathBuf::from(
                "/store/xwiki/Main/Sub%20Space/Web%2FHome/~this/attachments/my%20file.txt/my%20file.txt"
            )
        );
        assert_eq!(
            layout.attachment_archive_file(&doc(), "a.txt"),
            PathBuf::from("/store/xwiki/Main/Sub%20Space/Web%2FHome/~this/attachments/a.txt/~ARCHIVE.json")
        );
    }

    #[test]
    fn test_temp_backup_and_global_paths() {
        let layout = DefaultStorageLayout::new("/store");
        let target = Path::new("/store/x/a.txt");
        assert_eq!(layout.temp_file(target), PathBuf::from("/store/x/a.txt~tmp"));
        assert_eq!(layout.backup_file(target), PathBuf::from("/store/x/a.txt~bak"));
        assert_eq!(layout.holding_file(target), PathBuf::from("/store/x/a.txt~del"));
        assert_eq!(
            layout.global_file("MAP.json"),
            PathBuf::from("/store/~GLOBAL_MAP.json")
        );
    }

    #[test]
    fn test_reserved_names_never_collide() {
        let layout = DefaultStorageLayout::new("/store");
        assert_eq!(encode_segment("~ARCHIVE.json"), "%7EARCHIVE.json");
        assert_eq!(encode_segment("a~b"), "a%7Eb");
        assert!(matches!(encode_segment("plain.txt"), Cow::Borrowed(_)));

        let content = layout.attachment_content_file(&doc(), ARCHIVE_FILE_NAME);
        assert_ne!(content, layout.attachment_archive_file(&doc(), ARCHIVE_FILE_NAME));
        assert!(content.ends_with("%7EARCHIVE.json"));

        let at = Utc.timestamp_millis_opt(5).unwrap();
        let files = layout.deleted_attachment_dir(&doc(), DELETED_ATTACHMENT_METADATA_FILE_NAME, at);
        assert_ne!(files.content_file(), files.metadata_file());
        assert_ne!(
            layout.deleted_attachment_dir(&doc(), ARCHIVE_FILE_NAME, at).content_file(),
            files.archive_file()
        );

        // A name carrying a bookkeeping suffix stays distinct from that copy.
        let live = layout.attachment_content_file(&doc(), "a.txt");
        let suffixed = layout.attachment_content_file(&doc(), "a.txt~tmp");
        assert_ne!(suffixed.file_name(), layout.temp_file(&live).file_name());
        assert!(suffixed.ends_with("a.txt%7Etmp"));

        // Document segments are escaped the same way.
        let tilde_page = DocumentReference::new("xwiki", ["Main"], "~this");
        assert!(layout
            .attachment_dir(&tilde_page, "a.txt")
            .to_string_lossy()
            .contains("/Main/%7Ethis/~this/"));
    }

    #[test]
    fn test_tilde_and_dash_names_round_trip_through_trash_dir() {
        let layout = DefaultStorageLayout::new("/store");
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        for name in ["~ARCHIVE.json", "notes~bak", "release-2024-01", "-1"] {
            let files = layout.deleted_attachment_dir(&doc(), name, at);
            let relative = layout.relative_to_root(&files.dir).unwrap();
            let resolved = layout.deleted_attachment_files(&relative).unwrap();
            assert_eq!(resolved.filename, name);
            assert_eq!(resolved.deleted_at, at);
        }
    }

    #[test]
    fn test_dot_names_cannot_escape() {
        let layout = DefaultStorageLayout::new("/store");
        let path = layout.attachment_content_file(&doc(), "..");
        assert!(path.components().all(|c| c != Component::ParentDir));
    }

    #[test]
    fn test_trash_dir_round_trips_through_relative_path() {
        let layout = DefaultStorageLayout::new("/store");
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let files = layout.deleted_attachment_dir(&doc(), "report-final.pdf", at);
        assert!(files.dir.ends_with("deleted-attachments/report-final.pdf-1700000000123"));

        let relative = layout.relative_to_root(&files.dir).unwrap();
        assert!(relative.starts_with("xwiki/Main/"));
        let resolved = layout.deleted_attachment_files(&relative).unwrap();
        assert_eq!(resolved, files);
        assert!(resolved.metadata_file().ends_with("~DELETED_ATTACH_METADATA.json"));
        assert!(resolved.content_file().ends_with("report-final.pdf"));
    }

    #[test]
    fn test_deleted_attachment_files_rejects_bad_paths() {
        let layout = DefaultStorageLayout::new("/store");
        assert!(matches!(
            layout.deleted_attachment_files("../etc/passwd-1"),
            Err(Error::Corrupt(_))
        ));
        assert!(layout.deleted_attachment_files("/abs/a-1").is_err());
        assert!(layout.deleted_attachment_files("x/no-millis").is_err());
        assert!(layout.deleted_attachment_files("").is_err());
    }

    #[test]
    fn test_relative_to_root_outside() {
        let layout = DefaultStorageLayout::new("/store");
        assert!(layout.relative_to_root(Path::new("/elsewhere/a")).is_err());
    }

    #[test]
    fn test_parse_trash_dir_name() {
        let (name, at) = parse_trash_dir_name("a%20b-c.txt-42").unwrap();
        assert_eq!(name, "a b-c.txt");
        assert_eq!(at.timestamp_millis(), 42);
        assert!(parse_trash_dir_name("-42").is_none());
        assert!(parse_trash_dir_name("nodash").is_none());
    }

    #[tokio::test]
    async fn test_deleted_attachments_for_document_groups_by_name() {
        let dir = TempDir::new().unwrap();
        let layout = DefaultStorageLayout::new(dir.path());
        for (name, millis) in [("a.txt", 1), ("a.txt", 2), ("b.txt", 3)] {
            let at = Utc.timestamp_millis_opt(millis).unwrap();
            let files = layout.deleted_attachment_dir(&doc(), name, at);
            fs::create_dir_all(&files.dir).await.unwrap();
        }
        // Stray file and unparsable dir are ignored.
        let trash = layout.trash_root(&doc());
        fs::write(trash.join("stray"), b"x").await.unwrap();
        fs::create_dir(trash.join("garbage")).await.unwrap();

        let grouped = layout.deleted_attachments_for_document(&doc()).await.unwrap();
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["a.txt"].len(), 2);
        assert_eq!(grouped["b.txt"].len(), 1);
    }

    #[tokio::test]
    async fn test_deleted_attachments_for_unknown_document_is_empty() {
        let dir = TempDir::new().unwrap();
        let layout = DefaultStorageLayout::new(dir.path());
        let grouped = layout.deleted_attachments_for_document(&doc()).await.unwrap();
        assert!(grouped.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_prunes_empty_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("storage");
        fs::create_dir_all(root.join("w/s/p/~this/attachments/gone")).await.unwrap();
        fs::create_dir_all(root.join("w/s/q/~this/attachments/kept")).await.unwrap();
        fs::write(root.join("w/s/q/~this/attachments/kept/kept"), b"x")
            .await
            .unwrap();

        let layout = DefaultStorageLayout::new(&root);
        layout.initialize().await.unwrap();

        assert!(fs::try_exists(&root).await.unwrap());
        assert!(!fs::try_exists(root.join("w/s/p")).await.unwrap());
        assert!(fs::try_exists(root.join("w/s/q/~this/attachments/kept/kept"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_initialize_without_pruning_keeps_dirs() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::with_work_dir(dir.path()).prune_empty_dirs(false);
        let root = config.storage_root();
        fs::create_dir_all(root.join("empty")).await.unwrap();

        DefaultStorageLayout::from_config(&config)
            .initialize()
            .await
            .unwrap();
        assert!(fs::try_exists(root.join("empty")).await.unwrap());
    }

    #[test]
    fn test_same_path_same_lock() {
        let layout = DefaultStorageLayout::new("/store");
        let a = layout.lock_for(Path::new("/store/a"));
        let b = layout.lock_for(Path::new("/store/a"));
        assert!(a.same_lock(&b));
    }
}
