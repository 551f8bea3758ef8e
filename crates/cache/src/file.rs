//! Versioned container for serialized implementation objects.
//!
//! Layout (little-endian): `IMPLMAP\0`, `u32` schema version, `u32` record
//! count, then `count` records of `{ u32 tag, u32 blob_len, blob }`. Blobs
//! are opaque here; each backend decodes its own.

use implmap_kernels::{BlobReader, BlobWriter, DispatchError, ObjectType, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub const CACHE_MAGIC: &[u8; 8] = b"IMPLMAP\0";
pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub object_type: ObjectType,
    pub blob: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheFile {
    records: Vec<CacheRecord>,
}

impl CacheFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object_type: ObjectType, blob: Vec<u8>) {
        self.records.push(CacheRecord { object_type, blob });
    }

    pub fn records(&self) -> &[CacheRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut writer = BlobWriter::new();
        writer.put_bytes(CACHE_MAGIC);
        writer.put_u32(CACHE_VERSION);
        writer.put_u32(self.records.len() as u32);
        for record in &self.records {
            writer.put_u32(record.object_type.tag());
            writer.put_u32(record.blob.len() as u32);
            writer.put_bytes(&record.blob);
        }
        writer.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = BlobReader::new(bytes);
        let magic = reader.get_bytes(CACHE_MAGIC.len())?;
        if magic != CACHE_MAGIC {
            return Err(DispatchError::corruption("bad cache magic"));
        }
        let version = reader.get_u32()?;
        if version != CACHE_VERSION {
            return Err(DispatchError::corruption(format!(
                "unsupported cache version {version} (expected {CACHE_VERSION})"
            )));
        }

        let count = reader.get_u32()? as usize;
        // Each record needs at least its 8-byte header.
        if count.saturating_mul(8) > reader.remaining() {
            return Err(DispatchError::corruption(format!(
                "record count {count} exceeds file size"
            )));
        }
        let mut records = Vec::with_capacity(count);
        for index in 0..count {
            let tag = reader.get_u32()?;
            let object_type = ObjectType::from_tag(tag).ok_or_else(|| {
                DispatchError::corruption(format!("record {index}: unknown type tag {tag:#010x}"))
            })?;
            let len = reader.get_u32()? as usize;
            let blob = reader.get_bytes(len)?.to_vec();
            records.push(CacheRecord { object_type, blob });
        }
        reader.finish()?;
        Ok(Self { records })
    }

    /// Read a cache file. A missing file is `Ok(None)`; any other read failure
/// is `CacheUnreadable`, kept apart from corruption so callers do not delete
/// a file they could not inspect.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(DispatchError::CacheUnreadable {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let cache = Self::from_bytes(&bytes)?;
        debug!(path = %path.display(), records = cache.len(), "loaded implementation cache");
        Ok(Some(cache))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use implmap_kernels::BackendKind;

    fn sample() -> CacheFile {
        let mut cache = CacheFile::new();
        cache.push(ObjectType::from_tag(0x0001_0002).unwrap(), vec![1, 2, 3]);
        cache.push(ObjectType::from_tag(0x0003_0001).unwrap(), Vec::new());
        cache
    }

    #[test]
    fn header_is_little_endian() {
        let bytes = sample().to_bytes();
        assert_eq!(&bytes[..8], CACHE_MAGIC);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[2, 0, 0, 0]);
        assert_eq!(&bytes[16..20], &[2, 0, 1, 0]);
        assert_eq!(&bytes[20..24], &[3, 0, 0, 0]);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let cache = sample();
        let decoded = CacheFile::from_bytes(&cache.to_bytes()).unwrap();
        assert_eq!(decoded, cache);
        assert_eq!(decoded.records()[0].object_type.backend, BackendKind::Ocl);
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(CacheFile::from_bytes(&bytes).unwrap_err().is_cache_corruption());

        let mut bytes = sample().to_bytes();
        bytes[8] = 9;
        let err = CacheFile::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("version 9"));
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut bytes = sample().to_bytes();
        bytes[18] = 0x7f;
        let err = CacheFile::from_bytes(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown type tag"));
    }

    #[test]
    fn rejects_truncation_and_trailing_bytes() {
        let bytes = sample().to_bytes();
        for cut in [4, 10, 17, bytes.len() - 1] {
            assert!(CacheFile::from_bytes(&bytes[..cut]).is_err(), "cut at {cut}");
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(CacheFile::from_bytes(&longer).unwrap_err().is_cache_corruption());
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let path = std::env::temp_dir().join("implmap-cache-does-not-exist.bin");
        assert!(CacheFile::load(&path).unwrap().is_none());
    }
    #[test]
    fn unreadable_path_is_not_corruption() {
        let dir = std::env::temp_dir().join(format!("implmap-cache-dir-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let err = CacheFile::load(&dir).unwrap_err();
        assert!(matches!(err, DispatchError::CacheUnreadable { .. }));
        assert!(!err.is_cache_corruption());
        assert!(dir.is_dir());
        fs::remove_dir_all(&dir).unwrap();
    }
}
