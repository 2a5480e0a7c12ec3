//! Future ledger
//!
//! Ordered record of what every submission returned. Management
//! operations address it with slice bounds, negative ones counting from
//! the end, either by whole batch or over the flattened futures.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ops::Range;

use crate::executor::{FutureView, ResponseFuture};

/// Shape of what a submission returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchKind {
    /// `call_async`: one future
    Single,
    /// `map` and `map_reduce`: an ordered list
    List,
}

/// Futures returned by one submission
#[derive(Debug, Clone)]
pub struct FutureBatch {
    pub executor_id: String,
    pub kind: BatchKind,
    pub futures: Vec<ResponseFuture>,
}

impl FutureBatch {
    pub fn single(executor_id: impl Into<String>, future: ResponseFuture) -> Self {
        Self {
            executor_id: executor_id.into(),
            kind: BatchKind::Single,
            futures: vec![future],
        }
    }

    pub fn list(executor_id: impl Into<String>, futures: Vec<ResponseFuture>) -> Self {
        Self {
            executor_id: executor_id.into(),
            kind: BatchKind::List,
            futures,
        }
    }

    pub fn len(&self) -> usize {
        self.futures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }
}

/// How a selection is handed to management operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionMode {
    /// Results are grouped per batch
    Batch,
    /// Results are one flat sequence
    #[default]
    Flattened,
}

impl SelectionMode {
    pub fn from_flag(batch_mode: bool) -> Self {
        if batch_mode {
            Self::Batch
        } else {
            Self::Flattened
        }
    }
}

/// `[start:end]` over the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub mode: SelectionMode,
}

impl Selection {
    pub fn new(start: Option<i64>, end: Option<i64>, batch_mode: bool) -> Self {
        Self {
            start,
            end,
            mode: SelectionMode::from_flag(batch_mode),
        }
    }
}

/// Batches picked by a [`Selection`]
#[derive(Debug, Clone)]
pub struct Selected {
    pub mode: SelectionMode,
    pub batches: Vec<FutureBatch>,
}

impl Selected {
    /// No futures at all, whatever the number of batches
    pub fn is_empty(&self) -> bool {
        self.batches.iter().all(FutureBatch::is_empty)
    }

    /// Futures in batch order, then intra-batch order
    pub fn futures(&self) -> Vec<ResponseFuture> {
        self.batches
            .iter()
            .flat_map(|batch| batch.futures.iter().cloned())
            .collect()
    }

    /// Distinct producing executors
    pub fn executor_ids(&self) -> BTreeSet<&str> {
        self.batches
            .iter()
            .map(|batch| batch.executor_id.as_str())
            .collect()
    }
}

/// Resolve slice bounds against a sequence of `len` items
pub fn slice_range(len: usize, start: Option<i64>, end: Option<i64>) -> Range<usize> {
    let len = len as i64;
    let clamp = |index: i64| -> usize {
        let index = if index < 0 { index + len } else { index };
        index.clamp(0, len) as usize
    };
    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(len as usize);
    start..end.max(start)
}

/// Serializable entry of the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchView {
    pub index: usize,
    pub executor_id: String,
    pub kind: BatchKind,
    pub futures: Vec<FutureView>,
}

#[derive(Debug, Default)]
pub struct FutureLedger {
    batches: Vec<FutureBatch>,
}

impl FutureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch and return its index
    pub fn push(&mut self, batch: FutureBatch) -> usize {
        self.batches.push(batch);
        self.batches.len() - 1
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn batches(&self) -> &[FutureBatch] {
        &self.batches
    }

    pub fn select(&self, selection: Selection) -> Selected {
        let range = slice_range(self.batches.len(), selection.start, selection.end);
        Selected {
            mode: selection.mode,
            batches: self.batches[range].to_vec(),
        }
    }

    /// `del ledger[start:end]`; returns the number of removed batches
    pub fn delete(&mut self, start: Option<i64>, end: Option<i64>) -> usize {
        let range = slice_range(self.batches.len(), start, end);
        self.batches.drain(range).count()
    }

    /// Remove everything, returning the batches
    pub fn take_all(&mut self) -> Vec<FutureBatch> {
        std::mem::take(&mut self.batches)
    }

    pub fn view(&self) -> Vec<BatchView> {
        self.batches
            .iter()
            .enumerate()
            .map(|(index, batch)| BatchView {
                index,
                executor_id: batch.executor_id.clone(),
                kind: batch.kind,
                futures: batch.futures.iter().map(ResponseFuture::view).collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::CallId;
    use crate::storage::backends::MemoryBackend;
    use std::sync::Arc;

    fn batch(job: &str, size: usize) -> FutureBatch {
        let storage = Arc::new(MemoryBackend::new());
        let futures = (0..size)
            .map(|i| ResponseFuture::new(CallId::new("e", job, i), "f", storage.clone(), "b"))
            .collect();
        FutureBatch::list("e", futures)
    }

    fn ledger(sizes: &[usize]) -> FutureLedger {
        let mut ledger = FutureLedger::new();
        for (i, size) in sizes.iter().enumerate() {
            ledger.push(batch(&format!("M{:03}", i), *size));
        }
        ledger
    }

    #[test]
    fn test_slice_range_negative_and_clamped() {
        assert_eq!(slice_range(5, None, None), 0..5);
        assert_eq!(slice_range(5, Some(1), Some(3)), 1..3);
        assert_eq!(slice_range(5, Some(-2), None), 3..5);
        assert_eq!(slice_range(5, None, Some(-1)), 0..4);
        assert_eq!(slice_range(5, Some(10), Some(20)), 5..5);
        assert_eq!(slice_range(5, Some(-10), Some(2)), 0..2);
        assert_eq!(slice_range(5, Some(4), Some(1)), 4..4);
        assert_eq!(slice_range(0, None, None), 0..0);
    }

    #[test]
    fn test_flattened_selection_concatenates_in_order() {
        let ledger = ledger(&[1, 3, 2]);
        let selected = ledger.select(Selection::new(Some(1), None, false));
        let ids: Vec<String> = selected
            .futures()
            .iter()
            .map(|f| f.id().to_string())
            .collect();
        assert_eq!(
            ids,
            vec!["e/M001/00000", "e/M001/00001", "e/M001/00002", "e/M002/00000", "e/M002/00001"]
        );
        assert_eq!(selected.mode, SelectionMode::Flattened);
    }

    #[test]
    fn test_out_of_range_selection_is_empty() {
        let ledger = ledger(&[2]);
        assert!(ledger.select(Selection::new(Some(3), Some(7), true)).is_empty());
    }

    #[test]
    fn test_delete_shifts_later_batches() {
        let mut ledger = ledger(&[1, 1, 1, 1]);
        assert_eq!(ledger.delete(Some(1), Some(3)), 2);
        assert_eq!(ledger.len(), 2);
        let view = ledger.view();
        assert_eq!(view[1].index, 1);
        assert_eq!(view[1].futures[0].call_id, "e/M003/00000");

        assert_eq!(ledger.delete(Some(5), None), 0);
        assert_eq!(ledger.len(), 2);
    }
}
