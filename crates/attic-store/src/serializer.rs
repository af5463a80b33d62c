//! Serialization of archives, deleted-attachment records, and the id index.
//!
//! Every file carries a `format_version` so readers can reject files written
//! by a newer store.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use attic_core::defaults::FORMAT_VERSION;
use attic_core::{AttachmentArchive, DeletedAttachmentRecord, Error, Result};

/// Reads and writes an attachment's version history.
pub trait ArchiveSerializer: Send + Sync {
    fn serialize(&self, archive: &AttachmentArchive) -> Result<Vec<u8>>;

    fn parse(&self, bytes: &[u8]) -> Result<AttachmentArchive>;
}

/// Reads and writes deleted-attachment records and the id→path index.
pub trait MetadataSerializer: Send + Sync {
    fn serialize_record(&self, record: &DeletedAttachmentRecord) -> Result<Vec<u8>>;

    fn parse_record(&self, bytes: &[u8]) -> Result<DeletedAttachmentRecord>;

    fn serialize_index(&self, mappings: &BTreeMap<i64, String>) -> Result<Vec<u8>>;

    fn parse_index(&self, bytes: &[u8]) -> Result<BTreeMap<i64, String>>;
}

#[derive(Serialize, Deserialize)]
struct ArchiveFile<A> {
    format_version: u32,
    archive: A,
}

#[derive(Serialize, Deserialize)]
struct RecordFile<R> {
    format_version: u32,
    record: R,
}

#[derive(Serialize, Deserialize)]
struct IndexFile<M> {
    format_version: u32,
    mappings: M,
}

fn to_json<T: Serialize>(file: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(file)?)
}

fn from_json<T: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::Corrupt(format!("unreadable {what}: {e}")))
}

fn check_version(format_version: u32, what: &str) -> Result<()> {
    if format_version > FORMAT_VERSION {
        return Err(Error::Corrupt(format!(
            "{what} has format version {format_version}, newest supported is {FORMAT_VERSION}"
        )));
    }
    Ok(())
}

/// JSON archive format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonArchiveSerializer;

impl ArchiveSerializer for JsonArchiveSerializer {
    fn serialize(&self, archive: &AttachmentArchive) -> Result<Vec<u8>> {
        to_json(&ArchiveFile {
            format_version: FORMAT_VERSION,
            archive,
        })
    }

    fn parse(&self, bytes: &[u8]) -> Result<AttachmentArchive> {
        let file: ArchiveFile<AttachmentArchive> = from_json(bytes, "archive")?;
        check_version(file.format_version, "archive")?;
        Ok(file.archive)
    }
}

/// JSON metadata and index format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMetadataSerializer;

impl MetadataSerializer for JsonMetadataSerializer {
    fn serialize_record(&self, record: &DeletedAttachmentRecord) -> Result<Vec<u8>> {
        to_json(&RecordFile {
            format_version: FORMAT_VERSION,
            record,
        })
    }

    fn parse_record(&self, bytes: &[u8]) -> Result<DeletedAttachmentRecord> {
        let file: RecordFile<DeletedAttachmentRecord> =
            from_json(bytes, "deleted attachment metadata")?;
        check_version(file.format_version, "deleted attachment metadata")?;
        Ok(file.record)
    }

    fn serialize_index(&self, mappings: &BTreeMap<i64, String>) -> Result<Vec<u8>> {
        to_json(&IndexFile {
            format_version: FORMAT_VERSION,
            mappings,
        })
    }

    fn parse_index(&self, bytes: &[u8]) -> Result<BTreeMap<i64, String>> {
        let file: IndexFile<BTreeMap<i64, String>> = from_json(bytes, "id index")?;
        check_version(file.format_version, "id index")?;
        Ok(file.mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attic_core::{content_checksum, ArchiveRevision, DocumentReference};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_index_format() {
        let mut mappings = BTreeMap::new();
        mappings.insert(42_i64, "xwiki/Main/~this/deleted-attachments/a.txt-1".to_string());

        let bytes = JsonMetadataSerializer.serialize_index(&mappings).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["format_version"], 1);
        assert_eq!(
            value["mappings"]["42"],
            "xwiki/Main/~this/deleted-attachments/a.txt-1"
        );

        assert_eq!(JsonMetadataSerializer.parse_index(&bytes).unwrap(), mappings);
    }

    #[test]
    fn test_record_parse() {
        let record = DeletedAttachmentRecord::new(
            DocumentReference::new("xwiki", ["Main"], "WebHome"),
            "a.txt",
            "XWiki.Admin",
            Utc.timestamp_millis_opt(1_000).unwrap(),
        );
        let bytes = JsonMetadataSerializer.serialize_record(&record).unwrap();
        assert_eq!(JsonMetadataSerializer.parse_record(&bytes).unwrap(), record);
    }

    #[test]
    fn test_archive_parse() {
        let mut archive = AttachmentArchive::new("a.txt");
        archive.record_revision(ArchiveRevision {
            version: "1.1".to_string(),
            date: Utc.timestamp_millis_opt(1_000).unwrap(),
            author: None,
            mime_type: Some("text/plain".to_string()),
            size: 3,
            checksum: content_checksum(b"abc"),
            content: b"abc".to_vec(),
        });
        let bytes = JsonArchiveSerializer.serialize(&archive).unwrap();
        assert_eq!(JsonArchiveSerializer.parse(&bytes).unwrap(), archive);
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(matches!(
            JsonArchiveSerializer.parse(b"not json"),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(
            JsonMetadataSerializer.parse_record(b"{\"format_version\":1}"),
            Err(Error::Corrupt(_))
        ));
        assert!(matches!(
            JsonMetadataSerializer.parse_index(b"{\"format_version\":1,\"mappings\":{\"x\":\"y\"}}"),
            Err(Error::Corrupt(_))
        ));
    }

    #[test]
    fn test_newer_format_version_rejected() {
        let bytes = br#"{"format_version":99,"mappings":{}}"#;
        let err = JsonMetadataSerializer.parse_index(bytes).unwrap_err();
        assert!(err.to_string().contains("format version 99"));
    }
}
