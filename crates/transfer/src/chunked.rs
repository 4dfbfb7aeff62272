use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::TransferError;

// ---------------------------------------------------------------------------
// Part planning
// ---------------------------------------------------------------------------

/// A half-open byte range `[start, end)` of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// Zero-based position in the part list.
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    /// One-based part number as sent to the server.
    pub fn part_number(&self) -> u32 {
        self.index as u32 + 1
    }

    /// Length of the range in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Splits `length` bytes into contiguous ranges of `chunk_size`.
///
/// The last range may be shorter. An empty file yields a single empty range,
/// a file no larger than `chunk_size` yields a single range covering it.
pub fn plan_parts(length: u64, chunk_size: u64) -> Result<Vec<PartRange>, TransferError> {
    if chunk_size == 0 {
        return Err(TransferError::InvalidChunkSize);
    }

    if chunk_size >= length {
        return Ok(vec![PartRange {
            index: 0,
            start: 0,
            end: length,
        }]);
    }

    let count = length.div_ceil(chunk_size) as usize;
    let mut parts = Vec::with_capacity(count);
    let mut start = 0u64;
    while start < length {
        let end = (start + chunk_size).min(length);
        parts.push(PartRange {
            index: parts.len(),
            start,
            end,
        });
        start = end;
    }

    Ok(parts)
}

/// Returns `true` when a file split into `part_count` parts should go
/// through the multipart protocol instead of a single request.
pub fn should_use_multipart(part_count: usize, threshold: usize, enabled: bool) -> bool {
    enabled && part_count > threshold
}

// ---------------------------------------------------------------------------
// PartSource
// ---------------------------------------------------------------------------

/// Where part payloads come from.
///
/// Payloads are read only when a part is dispatched, so a large file is
/// never held in memory as a whole. Whole-file uploads stream the source
/// instead of reading it.
#[derive(Debug, Clone)]
pub enum PartSource {
    /// A file on disk, read range by range on the blocking pool.
    File { path: Arc<PathBuf>, len: u64 },
    /// An in-memory buffer; ranges are zero-copy slices.
    Memory(Bytes),
}

impl PartSource {
    /// Opens a file source, recording its current length.
    pub fn file(path: &Path) -> Result<Self, TransferError> {
        let len = std::fs::metadata(path)?.len();
        Ok(Self::File {
            path: Arc::new(path.to_path_buf()),
            len,
        })
    }

    pub fn memory(data: impl Into<Bytes>) -> Self {
        Self::Memory(data.into())
    }

    /// Total size in bytes.
    pub fn len(&self) -> u64 {
        match self {
            Self::File { len, .. } => *len,
            Self::Memory(data) => data.len() as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Materializes the bytes of `range`.
    pub async fn read_range(&self, range: &PartRange) -> Result<Bytes, TransferError> {
        match self {
            Self::Memory(data) => {
                let end = range.end.min(data.len() as u64);
                if end < range.end || range.start > end {
                    return Err(TransferError::ShortRead {
                        offset: range.start,
                        expected: range.len(),
                        actual: end.saturating_sub(range.start),
                    });
                }
                Ok(data.slice(range.start as usize..range.end as usize))
            }
            Self::File { path, .. } => {
                let path = Arc::clone(path);
                let range = *range;
                tokio::task::spawn_blocking(move || read_file_range(&path, &range))
                    .await
                    .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
            }
        }
    }
}

fn read_file_range(path: &Path, range: &PartRange) -> Result<Bytes, TransferError> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(range.start))?;

    let expected = range.len();
    let mut buf = Vec::with_capacity(expected as usize);
    let read = file.take(expected).read_to_end(&mut buf)? as u64;
    if read != expected {
        return Err(TransferError::ShortRead {
            offset: range.start,
            expected,
            actual: read,
        });
    }

    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const MIB: u64 = 1024 * 1024;

    fn create_test_file(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
        path
    }

    fn assert_covers(parts: &[PartRange], length: u64) {
        let mut expected_start = 0;
        for (i, p) in parts.iter().enumerate() {
            assert_eq!(p.index, i);
            assert_eq!(p.start, expected_start, "gap or overlap before part {i}");
            assert!(p.end >= p.start);
            expected_start = p.end;
        }
        assert_eq!(expected_start, length);
    }

    #[test]
    fn plan_covers_file_exactly() {
        for &(length, chunk) in &[(10u64, 4u64), (16, 8), (17, 8), (1, 1), (1000, 7), (7, 1000)] {
            let parts = plan_parts(length, chunk).unwrap();
            assert_covers(&parts, length);

            let expected = if chunk >= length { 1 } else { length.div_ceil(chunk) };
            assert_eq!(parts.len() as u64, expected, "length={length} chunk={chunk}");
            assert!(parts.iter().all(|p| !p.is_empty()));
            assert!(parts.iter().all(|p| p.len() <= chunk));
        }
    }

    #[test]
    fn plan_empty_file_is_single_empty_part() {
        let parts = plan_parts(0, 8).unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].is_empty());
        assert_eq!(parts[0].part_number(), 1);
    }

    #[test]
    fn plan_rejects_zero_chunk_size() {
        assert!(matches!(
            plan_parts(100, 0),
            Err(TransferError::InvalidChunkSize)
        ));
    }

    #[test]
    fn plan_twenty_mib_in_eight_mib_chunks() {
        let parts = plan_parts(20 * MIB, 8 * MIB).unwrap();
        let sizes: Vec<u64> = parts.iter().map(PartRange::len).collect();
        assert_eq!(sizes, vec![8 * MIB, 8 * MIB, 4 * MIB]);
        // 3 parts do not exceed a threshold of 3.
        assert!(!should_use_multipart(parts.len(), 3, true));
    }

    #[test]
    fn plan_thirty_mib_in_eight_mib_chunks() {
        let parts = plan_parts(30 * MIB, 8 * MIB).unwrap();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[3].len(), 6 * MIB);
        assert_eq!(parts[3].part_number(), 4);
        assert!(should_use_multipart(parts.len(), 3, true));
    }

    #[test]
    fn multipart_disabled_by_flag() {
        assert!(!should_use_multipart(100, 3, false));
    }

    #[tokio::test]
    async fn memory_source_slices_ranges() {
        let source = PartSource::memory(b"AABBCCDDEE".to_vec());
        let parts = plan_parts(source.len(), 4).unwrap();

        let chunks: Vec<Bytes> = {
            let mut out = Vec::new();
            for p in &parts {
                out.push(source.read_range(p).await.unwrap());
            }
            out
        };
        assert_eq!(chunks, vec![
            Bytes::from_static(b"AABB"),
            Bytes::from_static(b"CCDD"),
            Bytes::from_static(b"EE"),
        ]);
    }

    #[tokio::test]
    async fn file_source_reads_ranges_lazily() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");

        let source = PartSource::file(&path).unwrap();
        assert_eq!(source.len(), 10);

        let parts = plan_parts(source.len(), 4).unwrap();
        assert_eq!(&source.read_range(&parts[1]).await.unwrap()[..], b"4567");
        assert_eq!(&source.read_range(&parts[2]).await.unwrap()[..], b"89");
    }

    #[tokio::test]
    async fn file_source_detects_truncation() {
        let dir = TempDir::new().unwrap();
        let path = create_test_file(dir.path(), "test.bin", b"0123456789");
        let source = PartSource::file(&path).unwrap();

        // Shrink the file after it was measured.
        std::fs::write(&path, b"0123").unwrap();

        let range = PartRange {
            index: 1,
            start: 4,
            end: 8,
        };
        let err = source.read_range(&range).await.unwrap_err();
        assert!(matches!(err, TransferError::ShortRead { actual: 0, .. }));
    }

    #[test]
    fn file_source_missing_file() {
        assert!(PartSource::file(Path::new("/nonexistent/file.bin")).is_err());
    }
}
