//! Object partitioner for data-processing jobs
//!
//! A mapping row whose `obj` entry is a `"bucket/key"` string is expanded
//! into one activation per byte range of the object. The function receives
//! `obj` as a mapping with the partition coordinates and its `data`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use super::request::{DataRow, ObjectPartitioning};
use crate::error::{ComputeError, ErrorCode, Result};
use crate::storage::ObjectStorage;

/// Smallest accepted `obj_chunk_size`
pub const MIN_OBJ_CHUNK_SIZE: u64 = 1024 * 1024;

/// Row key that marks an object reference
pub const OBJ_KEY: &str = "obj";

/// One byte range of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub bucket: String,
    pub key: String,
    pub part: usize,
    /// `[start, end)` in bytes
    pub data_byte_range: (u64, u64),
    pub total_size: u64,
}

impl Partition {
    /// `bucket/key` of the source object
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    /// The `obj` argument handed to the function
    pub fn to_argument(&self, data: &[u8]) -> Value {
        json!({
            "bucket": self.bucket,
            "key": self.key,
            "part": self.part,
            "data_byte_range": [self.data_byte_range.0, self.data_byte_range.1],
            "total_size": self.total_size,
            "data": String::from_utf8_lossy(data),
        })
    }
}

/// A row ready for activation, with the partition it reads (if any)
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedRow {
    pub row: DataRow,
    pub partition: Option<Partition>,
}

/// Split `"bucket/key"` (optionally prefixed with a `scheme://`)
pub fn parse_object_ref(reference: &str) -> Result<(String, String)> {
    let trimmed = reference
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(reference);
    match trimmed.split_once('/') {
        Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
            Ok((bucket.to_string(), key.to_string()))
        }
        _ => Err(ComputeError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_INPUT,
            format!("obj '{}' is not a 'bucket/key' reference", reference),
            Some(OBJ_KEY.to_string()),
        )),
    }
}

/// Validate the chunking options before anything is read
pub fn validate(options: &ObjectPartitioning) -> Result<()> {
    if let Some(number) = options.chunk_number {
        if number == 0 {
            return Err(ComputeError::validation_with_code(
                ErrorCode::VALIDATION_OUT_OF_RANGE,
                "obj_chunk_number must be at least 1",
                Some("obj_chunk_number".to_string()),
            ));
        }
    } else if let Some(size) = options.chunk_size {
        if size < MIN_OBJ_CHUNK_SIZE {
            return Err(ComputeError::validation_with_code(
                ErrorCode::VALIDATION_OUT_OF_RANGE,
                format!("obj_chunk_size must be >= 1MiB ({} bytes), got {}", MIN_OBJ_CHUNK_SIZE, size),
                Some("obj_chunk_size".to_string()),
            ));
        }
    }
    if matches!(&options.newline, Some(n) if n.is_empty()) {
        return Err(ComputeError::validation_with_code(
            ErrorCode::VALIDATION_INVALID_INPUT,
            "obj_newline must not be empty",
            Some("obj_newline".to_string()),
        ));
    }
    Ok(())
}

/// Fixed byte ranges for an object of `size` bytes.
///
/// `chunk_number` wins over `chunk_size`; neither yields one range.
pub fn byte_ranges(size: u64, options: &ObjectPartitioning) -> Vec<(u64, u64)> {
    let chunk = match (options.chunk_number, options.chunk_size) {
        (Some(number), _) => size.div_ceil(u64::from(number.max(1))).max(1),
        (None, Some(chunk_size)) => chunk_size.max(1),
        (None, None) => size.max(1),
    };

    let mut ranges = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + chunk).min(size);
        ranges.push((start, end));
        start = end;
    }
    if ranges.is_empty() {
        ranges.push((0, 0));
    }
    ranges
}

/// Move every inner boundary forward to just past the next newline.
///
/// Ranges that become empty are dropped, so every line lands in exactly one
/// partition.
pub fn align_to_newline(body: &[u8], ranges: &[(u64, u64)], newline: &[u8]) -> Vec<(u64, u64)> {
    let size = body.len() as u64;
    let mut boundaries = vec![0u64];
    for &(_, end) in ranges.iter().take(ranges.len().saturating_sub(1)) {
        let aligned = find_after(body, end, newline).unwrap_or(size);
        let last = *boundaries.last().unwrap_or(&0);
        boundaries.push(aligned.max(last));
    }
    boundaries.push(size);

    let aligned: Vec<(u64, u64)> = boundaries
        .windows(2)
        .map(|w| (w[0], w[1]))
        .filter(|(start, end)| end > start)
        .collect();
    if aligned.is_empty() {
        vec![(0, size)]
    } else {
        aligned
    }
}

/// Offset just past the first `newline` that ends at or after `from`
fn find_after(body: &[u8], from: u64, newline: &[u8]) -> Option<u64> {
    let from = from as usize;
    if from == 0 || from > body.len() {
        return None;
    }
    // A boundary sitting right after a newline is already aligned
    let search_start = from.saturating_sub(newline.len());
    body[search_start..]
        .windows(newline.len())
        .position(|w| w == newline)
        .map(|pos| (search_start + pos + newline.len()) as u64)
}

/// Expand object rows into one planned row per partition; other rows pass through
pub async fn plan_rows(
    storage: &Arc<dyn ObjectStorage>,
    rows: Vec<DataRow>,
    options: &ObjectPartitioning,
) -> Result<Vec<PlannedRow>> {
    let has_objects = rows.iter().any(|row| matches!(row.get(OBJ_KEY), Some(Value::String(_))));
    if !has_objects {
        return Ok(rows
            .into_iter()
            .map(|row| PlannedRow {
                row,
                partition: None,
            })
            .collect());
    }
    validate(options)?;

    let mut planned = Vec::new();
    for row in rows {
        let reference = match row.get(OBJ_KEY) {
            Some(Value::String(reference)) => reference.clone(),
            _ => {
                planned.push(PlannedRow {
                    row,
                    partition: None,
                });
                continue;
            }
        };
        let (bucket, key) = parse_object_ref(&reference)?;
        let size = storage.head_object(&bucket, &key).await?.ok_or_else(|| {
            ComputeError::storage_with_code(
                ErrorCode::STORAGE_NOT_FOUND,
                format!("object not found: {}", reference),
                Some(reference.clone()),
            )
        })?;

        let mut ranges = byte_ranges(size, options);
        if let (Some(newline), true) = (&options.newline, ranges.len() > 1) {
            let body = storage.get_object(&bucket, &key).await?;
            ranges = align_to_newline(&body, &ranges, newline.as_bytes());
        }
        debug!("Partitioned {} ({} bytes) into {} chunks", reference, size, ranges.len());

        for (part, range) in ranges.into_iter().enumerate() {
            planned.push(PlannedRow {
                row: row.clone(),
                partition: Some(Partition {
                    bucket: bucket.clone(),
                    key: key.clone(),
                    part,
                    data_byte_range: range,
                    total_size: size,
                }),
            });
        }
    }
    Ok(planned)
}

/// Replace the row's `obj` reference with the loaded partition
pub fn inject_partition(row: DataRow, partition: &Partition, data: &[u8]) -> DataRow {
    // Partitions are only planned for mapping rows
    let mut map = match row {
        DataRow::Mapping(map) => map,
        _ => Map::new(),
    };
    map.insert(OBJ_KEY.to_string(), partition.to_argument(data));
    DataRow::Mapping(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backends::MemoryBackend;

    fn options(chunk_number: Option<u32>, chunk_size: Option<u64>) -> ObjectPartitioning {
        ObjectPartitioning {
            chunk_size,
            chunk_number,
            newline: Some("\n".into()),
        }
    }

    #[test]
    fn test_parse_object_ref() {
        assert_eq!(
            parse_object_ref("data/texts/a.txt").unwrap(),
            ("data".to_string(), "texts/a.txt".to_string())
        );
        assert_eq!(
            parse_object_ref("s3://data/a.txt").unwrap(),
            ("data".to_string(), "a.txt".to_string())
        );
        assert!(parse_object_ref("nokey").is_err());
    }

    #[test]
    fn test_chunk_number_wins_over_size() {
        let ranges = byte_ranges(10, &options(Some(3), Some(MIN_OBJ_CHUNK_SIZE)));
        assert_eq!(ranges, vec![(0, 4), (4, 8), (8, 10)]);
        assert_eq!(byte_ranges(10, &options(None, None)), vec![(0, 10)]);
    }

    #[test]
    fn test_small_chunk_size_rejected() {
        let err = validate(&options(None, Some(1024))).unwrap_err();
        assert_eq!(err.code(), ErrorCode::VALIDATION_OUT_OF_RANGE);
        assert!(validate(&options(Some(2), Some(1024))).is_ok());
    }

    #[test]
    fn test_newline_alignment_keeps_lines_whole() {
        let body = b"aaa\nbbb\nccc\n";
        let ranges = byte_ranges(body.len() as u64, &options(Some(3), None));
        let aligned = align_to_newline(body, &ranges, b"\n");
        assert_eq!(aligned, vec![(0, 4), (4, 8), (8, 12)]);

        let body = b"aaaaaaaaaa\nb\n";
        let aligned = align_to_newline(body, &byte_ranges(13, &options(Some(3), None)), b"\n");
        assert_eq!(aligned, vec![(0, 11), (11, 13)]);
    }

    #[tokio::test]
    async fn test_plan_rows_expands_objects() {
        let memory = MemoryBackend::new();
        memory
            .put_object("data", "words.txt", b"one two\nthree\nfour five\n".to_vec())
            .await
            .unwrap();
        let storage: Arc<dyn ObjectStorage> = Arc::new(memory);

        let row = DataRow::Mapping(
            json!({"obj": "data/words.txt"}).as_object().cloned().unwrap(),
        );
        let planned = plan_rows(&storage, vec![row, DataRow::Single(json!(1))], &options(Some(2), None))
            .await
            .unwrap();

        assert_eq!(planned.len(), 3);
        let first = planned[0].partition.as_ref().unwrap();
        assert_eq!(first.object_key(), "data/words.txt");
        assert_eq!(first.data_byte_range, (0, 14));
        assert!(planned[2].partition.is_none());
    }

    #[tokio::test]
    async fn test_missing_object_is_storage_error() {
        let storage: Arc<dyn ObjectStorage> = Arc::new(MemoryBackend::new());
        let row = DataRow::Mapping(json!({"obj": "data/none"}).as_object().cloned().unwrap());
        let err = plan_rows(&storage, vec![row], &ObjectPartitioning::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::STORAGE_NOT_FOUND);
    }
}
