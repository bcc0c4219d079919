//! Single-file snapshots of an [`InMemoryBackend`].
//!
//! Layout:
//!
//! ```text
//! "VORS" | u32 BE format version | u64 BE repository version
//!        | zstd(bincode(tables)) | u32 BE CRC32 of the compressed body
//! ```

use std::path::Path;

use tracing::info;
use vor_types::Version;

use crate::error::{StoreError, StoreResult};
use crate::memory::{InMemoryBackend, Tables};

const MAGIC: &[u8; 4] = b"VORS";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// Summary of a written or read snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub version: Version,
    pub compressed_bytes: usize,
    pub crc32: u32,
}

impl InMemoryBackend {
    /// Encode the whole backend. A pending commit is not included.
    pub fn to_snapshot_bytes(&self, level: i32) -> StoreResult<(Vec<u8>, SnapshotInfo)> {
        let tables = self.tables.read().expect("lock poisoned");
        let body =
            bincode::serialize(&*tables).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = zstd::encode_all(body.as_slice(), level)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let crc32 = crc32fast::hash(&compressed);

        let mut out = Vec::with_capacity(HEADER_LEN + compressed.len() + 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        out.extend_from_slice(&tables.current.to_be_bytes());
        out.extend_from_slice(&compressed);
        out.extend_from_slice(&crc32.to_be_bytes());

        let info = SnapshotInfo {
            version: tables.current,
            compressed_bytes: compressed.len(),
            crc32,
        };
        Ok((out, info))
    }

    /// Decode a backend from snapshot bytes.
    pub fn from_snapshot_bytes(data: &[u8]) -> StoreResult<(Self, SnapshotInfo)> {
        let info = verify_snapshot(data)?;
        let body = &data[HEADER_LEN..data.len() - 4];
        let raw = zstd::decode_all(body).map_err(|e| StoreError::Compression(e.to_string()))?;
        let tables: Tables =
            bincode::deserialize(&raw).map_err(|e| StoreError::Serialization(e.to_string()))?;
        if tables.current != info.version {
            return Err(StoreError::Corrupt(format!(
                "header version {} does not match body version {}",
                info.version, tables.current
            )));
        }
        Ok((Self::from_tables(tables), info))
    }

    /// Write a snapshot file.
    pub fn write_snapshot(&self, path: &Path, level: i32) -> StoreResult<SnapshotInfo> {
        let (bytes, info) = self.to_snapshot_bytes(level)?;
        std::fs::write(path, bytes)?;
        info!(path = %path.display(), version = info.version, "snapshot written");
        Ok(info)
    }

    /// Read a snapshot file.
    pub fn read_snapshot(path: &Path) -> StoreResult<(Self, SnapshotInfo)> {
        let data = std::fs::read(path)?;
        Self::from_snapshot_bytes(&data)
    }
}

/// Check the header and trailer of snapshot bytes without decoding the body.
pub fn verify_snapshot(data: &[u8]) -> StoreResult<SnapshotInfo> {
    if data.len() < HEADER_LEN + 4 {
        return Err(StoreError::Corrupt("snapshot too short".into()));
    }
    if &data[0..4] != MAGIC {
        return Err(StoreError::InvalidMagic {
            expected: String::from_utf8_lossy(MAGIC).into(),
            actual: String::from_utf8_lossy(&data[0..4]).into(),
        });
    }
    let format = u32::from_be_bytes(read_array(&data[4..8])?);
    if format != FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion(format));
    }
    let version = u64::from_be_bytes(read_array(&data[8..16])?);
    let body = &data[HEADER_LEN..data.len() - 4];
    let expected = u32::from_be_bytes(read_array(&data[data.len() - 4..])?);
    let computed = crc32fast::hash(body);
    if expected != computed {
        return Err(StoreError::ChecksumMismatch { expected, computed });
    }
    Ok(SnapshotInfo {
        version,
        compressed_bytes: body.len(),
        crc32: computed,
    })
}

fn read_array<const N: usize>(bytes: &[u8]) -> StoreResult<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("expected {N} bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ItemRecord, ValueRecord};
    use crate::traits::{ItemStore, LobStore, ValueStore, VersionControl};
    use vor_types::{ItemId, ItemStatus, LobId, ValueFlags, ValueId};

    fn populated() -> (InMemoryBackend, ItemId, ValueId) {
        let backend = InMemoryBackend::new();
        let item = ItemId::new();
        let value = ValueId::new();
        let v = backend.begin_commit(0).unwrap();
        backend
            .save_value(
                value,
                ValueRecord {
                    attr: None,
                    flags: ValueFlags::NONE,
                    data: b"payload".to_vec(),
                },
            )
            .unwrap();
        backend
            .save_item(ItemRecord {
                item,
                version: v,
                kind: None,
                status: ItemStatus::NONE,
                parent: None,
                name: Some("root".into()),
                class: None,
                values: vec![("title".into(), value)],
                dirties: vec!["title".into()],
            })
            .unwrap();
        backend.save_lob(LobId::new(), b"blob").unwrap();
        backend.publish(v).unwrap();
        (backend, item, value)
    }

    #[test]
    fn bytes_roundtrip() {
        let (backend, item, value) = populated();
        let (bytes, written) = backend.to_snapshot_bytes(3).unwrap();
        let (restored, read) = InMemoryBackend::from_snapshot_bytes(&bytes).unwrap();

        assert_eq!(written, read);
        assert_eq!(restored.current_version().unwrap(), 1);
        assert_eq!(restored.load_item(&item, 1).unwrap().unwrap().value_id("title"), Some(value));
        assert_eq!(restored.load_value(&value).unwrap().unwrap().data, b"payload");
        assert_eq!(restored.lob_count(), 1);
    }

    #[test]
    fn file_roundtrip() {
        let (backend, item, _) = populated();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repo.vors");
        backend.write_snapshot(&path, 1).unwrap();

        let (restored, info) = InMemoryBackend::read_snapshot(&path).unwrap();
        assert_eq!(info.version, 1);
        assert_eq!(restored.item_versions(&item).unwrap(), vec![1]);
    }

    #[test]
    fn bad_magic_rejected() {
        let (backend, _, _) = populated();
        let (mut bytes, _) = backend.to_snapshot_bytes(3).unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            verify_snapshot(&bytes),
            Err(StoreError::InvalidMagic { .. })
        ));
    }

    #[test]
    fn corrupted_body_fails_crc() {
        let (backend, _, _) = populated();
        let (mut bytes, _) = backend.to_snapshot_bytes(3).unwrap();
        bytes[HEADER_LEN + 2] ^= 0xff;
        assert!(matches!(
            InMemoryBackend::from_snapshot_bytes(&bytes),
            Err(StoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn truncated_snapshot_rejected() {
        assert!(matches!(
            verify_snapshot(b"VORS"),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn unsupported_format_version() {
        let (backend, _, _) = populated();
        let (mut bytes, _) = backend.to_snapshot_bytes(3).unwrap();
        bytes[4..8].copy_from_slice(&9u32.to_be_bytes());
        assert!(matches!(
            verify_snapshot(&bytes),
            Err(StoreError::UnsupportedVersion(9))
        ));
    }
}
