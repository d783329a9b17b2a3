//! Resume-from-cursor lookup.
//!
//! The retained records form an id-ordered sequence with known endpoints
//! `first_id` and `last_id`. Given a subscriber cursor `c`, the first record
//! with `id > c` is found by walking from whichever end is closer:
//!
//! ```text
//!   c < first_id                    walk forward from the head (stale cursor)
//!   c - first_id < last_id - c      walk forward from the head until id > c
//!   otherwise                       walk backward from the tail until id <= c
//! ```
//!
//! With contiguous ids the walk passes over at most
//! `min(c - first_id + 1, last_id - c)` records.

use std::collections::VecDeque;

use crate::record::EventRecord;

/// Which end a scan starts from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// Cursor predates the retained window; start at the oldest record.
    FromHead,
    /// Walk forward from the oldest record.
    Forward,
    /// Walk backward from the newest record.
    Backward,
}

/// Where a drain should start reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanPosition {
    /// Index of the first record with `id > cursor`.
    pub index: usize,
    pub direction: ScanDirection,
    /// Records passed over to reach `index`.
    pub steps: usize,
}

/// Stateless cursor lookup over an id-ordered record store.
pub struct CursorScanner;

impl CursorScanner {
    /// Pick a scan direction, or `None` when the cursor is caught up.
    pub fn plan(cursor: u64, first_id: u64, last_id: u64) -> Option<ScanDirection> {
        if cursor >= last_id {
            return None;
        }
        if cursor < first_id {
            return Some(ScanDirection::FromHead);
        }
        if cursor - first_id < last_id - cursor {
            Some(ScanDirection::Forward)
        } else {
            Some(ScanDirection::Backward)
        }
    }

    /// Locate the first record with `id > cursor`.
    ///
    /// Returns `None` when no such record is retained.
    pub fn locate(
        records: &VecDeque<EventRecord>,
        cursor: u64,
        first_id: u64,
        last_id: u64,
    ) -> Option<ScanPosition> {
        if records.is_empty() {
            return None;
        }
        let direction = Self::plan(cursor, first_id, last_id)?;

        let (index, steps) = match direction {
            ScanDirection::FromHead => (0, 0),
            ScanDirection::Forward => {
                let mut index = 0;
                while index < records.len() && records[index].id <= cursor {
                    index += 1;
                }
                (index, index)
            }
            ScanDirection::Backward => {
                let mut index = records.len();
                while index > 0 && records[index - 1].id > cursor {
                    index -= 1;
                }
                (index, records.len() - index)
            }
        };

        if index >= records.len() {
            return None;
        }
        Some(ScanPosition {
            index,
            direction,
            steps,
        })
    }
}
