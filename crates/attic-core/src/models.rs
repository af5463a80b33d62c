//! Domain models for documents, attachments, archives, and the recycle bin.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::content::FileContent;
use crate::defaults::INITIAL_ATTACHMENT_VERSION;
use crate::error::Result;

// =============================================================================
// DOCUMENTS
// =============================================================================

/// Reference to a wiki document: `wiki:Space.Nested.Page`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentReference {
    pub wiki: String,
    pub spaces: Vec<String>,
    pub page: String,
}

impl DocumentReference {
    pub fn new(
        wiki: impl Into<String>,
        spaces: impl IntoIterator<Item = impl Into<String>>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            wiki: wiki.into(),
            spaces: spaces.into_iter().map(Into::into).collect(),
            page: page.into(),
        }
    }
}

impl fmt::Display for DocumentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.wiki)?;
        for space in &self.spaces {
            write!(f, "{space}.")?;
        }
        write!(f, "{}", self.page)
    }
}

/// Attachment entry in a document's attachment list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    pub filename: String,
    pub version: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub date: DateTime<Utc>,
}

/// Document metadata as persisted by the relational store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub reference: DocumentReference,
    pub attachments: Vec<AttachmentSummary>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(reference: DocumentReference) -> Self {
        Self {
            reference,
            attachments: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn attachment(&self, filename: &str) -> Option<&AttachmentSummary> {
        self.attachments.iter().find(|a| a.filename == filename)
    }

    /// Insert or replace the list entry for `attachment`.
    pub fn upsert_attachment(&mut self, attachment: &Attachment) {
        self.upsert_summary(attachment.summary());
    }

    /// Insert or replace the list entry with the same filename.
    pub fn upsert_summary(&mut self, summary: AttachmentSummary) {
        match self
            .attachments
            .iter_mut()
            .find(|a| a.filename == summary.filename)
        {
            Some(existing) => *existing = summary,
            None => self.attachments.push(summary),
        }
        self.updated_at = Utc::now();
    }

    /// Remove the list entry for `filename`. Returns whether one existed.
    pub fn remove_attachment(&mut self, filename: &str) -> bool {
        let before = self.attachments.len();
        self.attachments.retain(|a| a.filename != filename);
        let removed = self.attachments.len() != before;
        if removed {
            self.updated_at = Utc::now();
        }
        removed
    }
}

// =============================================================================
// ATTACHMENTS
// =============================================================================

/// Attachment bytes, either held in memory or referenced on disk.
#[derive(Debug, Clone)]
pub enum AttachmentContent {
    Memory(Vec<u8>),
    File(FileContent),
}

impl AttachmentContent {
    /// Materialize the bytes, reading the file under its read lock if needed.
    pub async fn bytes(&self) -> Result<Vec<u8>> {
        match self {
            AttachmentContent::Memory(bytes) => Ok(bytes.clone()),
            AttachmentContent::File(file) => file.read().await,
        }
    }
}

/// A named binary payload owned by a document.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub document: DocumentReference,
    pub filename: String,
    pub version: String,
    pub date: DateTime<Utc>,
    pub author: Option<String>,
    pub mime_type: Option<String>,
    pub size: u64,
    /// Current content. `None` means "not loaded", never "empty".
    pub content: Option<AttachmentContent>,
    pub archive: Option<AttachmentArchive>,
}

impl Attachment {
    pub fn new(document: DocumentReference, filename: impl Into<String>) -> Self {
        Self {
            document,
            filename: filename.into(),
            version: INITIAL_ATTACHMENT_VERSION.to_string(),
            date: Utc::now(),
            author: None,
            mime_type: None,
            size: 0,
            content: None,
            archive: None,
        }
    }

    /// Replace the content with in-memory bytes and update the size.
    pub fn set_content(&mut self, bytes: impl Into<Vec<u8>>) {
        let bytes = bytes.into();
        self.size = bytes.len() as u64;
        self.content = Some(AttachmentContent::Memory(bytes));
    }

    pub fn with_content(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.set_content(bytes);
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn summary(&self) -> AttachmentSummary {
        AttachmentSummary {
            filename: self.filename.clone(),
            version: self.version.clone(),
            size: self.size,
            mime_type: self.mime_type.clone(),
            date: self.date,
        }
    }
}

// =============================================================================
// ARCHIVE
// =============================================================================

/// One stored revision in an attachment's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRevision {
    pub version: String,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub size: u64,
    /// SHA-256 of `content`, hex encoded.
    pub checksum: String,
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

/// Ordered version history of an attachment, oldest revision first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentArchive {
    pub filename: String,
    pub revisions: Vec<ArchiveRevision>,
}

impl AttachmentArchive {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            revisions: Vec::new(),
        }
    }

    /// Record a revision. A revision with the same version replaces the
    /// stored one in place, otherwise it is appended.
    pub fn record_revision(&mut self, revision: ArchiveRevision) {
        match self
            .revisions
            .iter_mut()
            .find(|r| r.version == revision.version)
        {
            Some(existing) => *existing = revision,
            None => self.revisions.push(revision),
        }
    }

    pub fn latest(&self) -> Option<&ArchiveRevision> {
        self.revisions.last()
    }

    pub fn revision(&self, version: &str) -> Option<&ArchiveRevision> {
        self.revisions.iter().find(|r| r.version == version)
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// RECYCLE BIN
// =============================================================================

/// Metadata stored beside a trashed attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedAttachmentRecord {
    pub id: i64,
    pub document: DocumentReference,
    pub filename: String,
    pub deleter: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedAttachmentRecord {
    pub fn new(
        document: DocumentReference,
        filename: impl Into<String>,
        deleter: impl Into<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        let filename = filename.into();
        let id = Self::compute_id(&document, &filename, deleted_at);
        Self {
            id,
            document,
            filename,
            deleter: deleter.into(),
            deleted_at,
        }
    }

    /// Stable identifier for one deletion event.
    ///
    /// First eight bytes of SHA-256 over `document/filename/millis`, with the
    /// sign bit cleared so identifiers are never negative.
    pub fn compute_id(
        document: &DocumentReference,
        filename: &str,
        deleted_at: DateTime<Utc>,
    ) -> i64 {
        let mut hasher = Sha256::new();
        hasher.update(document.to_string().as_bytes());
        hasher.update(b"/");
        hasher.update(filename.as_bytes());
        hasher.update(b"/");
        hasher.update(deleted_at.timestamp_millis().to_string().as_bytes());
        let digest = hasher.finalize();

        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        (u64::from_be_bytes(head) & (i64::MAX as u64)) as i64
    }
}

/// A trashed attachment reconstructed from its trash directory.
#[derive(Debug, Clone)]
pub struct DeletedAttachment {
    pub record: DeletedAttachmentRecord,
    /// Attachment with a lazy content handle and its archive, if one was stored.
    pub attachment: Attachment,
}

impl DeletedAttachment {
    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn deleted_at(&self) -> DateTime<Utc> {
        self.record.deleted_at
    }

    /// Build a live attachment holding the trashed bytes in memory.
    ///
    /// The trash copy is left untouched.
    pub async fn restore_attachment(&self) -> Result<Attachment> {
        let mut restored = self.attachment.clone();
        if let Some(content) = &self.attachment.content {
            let bytes = content.bytes().await?;
            restored.size = bytes.len() as u64;
            restored.content = Some(AttachmentContent::Memory(bytes));
        }
        Ok(restored)
    }
}

/// Hex-encoded SHA-256 digest for archive checksums.
pub fn content_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn doc_ref() -> DocumentReference {
        DocumentReference::new("xwiki", ["Main", "Sub"], "WebHome")
    }

    #[test]
    fn test_document_reference_display() {
        assert_eq!(doc_ref().to_string(), "xwiki:Main.Sub.WebHome");
        let top = DocumentReference::new("wiki", Vec::<String>::new(), "Page");
        assert_eq!(top.to_string(), "wiki:Page");
    }

    #[test]
    fn test_document_upsert_and_remove_attachment() {
        let mut doc = Document::new(doc_ref());
        let a = Attachment::new(doc_ref(), "a.txt").with_content(b"one".to_vec());
        doc.upsert_attachment(&a);
        doc.upsert_attachment(&a.clone().with_version("1.2"));
        assert_eq!(doc.attachments.len(), 1);
        assert_eq!(doc.attachment("a.txt").unwrap().version, "1.2");

        assert!(doc.remove_attachment("a.txt"));
        assert!(!doc.remove_attachment("a.txt"));
        assert!(doc.attachments.is_empty());
    }

    #[test]
    fn test_set_content_updates_size() {
        let mut a = Attachment::new(doc_ref(), "a.txt");
        assert!(a.content.is_none());
        a.set_content(b"12345".to_vec());
        assert_eq!(a.size, 5);
        assert_eq!(a.version, INITIAL_ATTACHMENT_VERSION);
    }

    #[test]
    fn test_archive_record_revision_replaces_same_version() {
        let revision = |version: &str, body: &[u8]| ArchiveRevision {
            version: version.to_string(),
            date: Utc::now(),
            author: None,
            mime_type: None,
            size: body.len() as u64,
            checksum: content_checksum(body),
            content: body.to_vec(),
        };

        let mut archive = AttachmentArchive::new("a.txt");
        archive.record_revision(revision("1.1", b"one"));
        archive.record_revision(revision("1.2", b"two"));
        archive.record_revision(revision("1.2", b"two again"));

        assert_eq!(archive.len(), 2);
        assert_eq!(archive.latest().unwrap().content, b"two again");
        assert_eq!(archive.revision("1.1").unwrap().content, b"one");
    }

    #[test]
    fn test_archive_revision_content_is_base64_in_json() {
        let revision = ArchiveRevision {
            version: "1.1".to_string(),
            date: Utc.timestamp_millis_opt(0).unwrap(),
            author: Some("XWiki.Admin".to_string()),
            mime_type: None,
            size: 5,
            checksum: content_checksum(b"hello"),
            content: b"hello".to_vec(),
        };
        let json = serde_json::to_string(&revision).unwrap();
        assert!(json.contains("\"content\":\"aGVsbG8=\""));
        assert!(!json.contains("mime_type"));

        let parsed: ArchiveRevision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, revision);
    }

    #[test]
    fn test_compute_id_is_stable_and_non_negative() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let a = DeletedAttachmentRecord::compute_id(&doc_ref(), "a.txt", at);
        let b = DeletedAttachmentRecord::compute_id(&doc_ref(), "a.txt", at);
        let later = at + chrono::Duration::milliseconds(1);
        let c = DeletedAttachmentRecord::compute_id(&doc_ref(), "a.txt", later);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a >= 0 && c >= 0);
    }

    #[test]
    fn test_content_checksum() {
        assert_eq!(
            content_checksum(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_restore_attachment_from_memory_content() {
        let record = DeletedAttachmentRecord::new(doc_ref(), "a.txt", "XWiki.Admin", Utc::now());
        let deleted = DeletedAttachment {
            record,
            attachment: Attachment::new(doc_ref(), "a.txt").with_content(b"bytes".to_vec()),
        };
        let restored = deleted.restore_attachment().await.unwrap();
        assert!(matches!(
            restored.content,
            Some(AttachmentContent::Memory(ref b)) if b == b"bytes"
        ));
    }
}
