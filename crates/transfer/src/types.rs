use serde::{Deserialize, Serialize};

use crate::PartRange;

/// Lifecycle of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartStatus {
    Pending,
    InFlight,
    Done,
    Failed,
}

/// One part of a multipart upload.
///
/// The byte range never changes after planning; status, entity tag and
/// byte counters are updated as requests settle.
#[derive(Debug, Clone)]
pub struct Part {
    pub range: PartRange,
    pub status: PartStatus,
    /// Entity tag returned by the server once the part is stored.
    pub entity_tag: Option<String>,
    /// Bytes of this part handed to the transport during the current attempt.
    pub bytes_sent: u64,
    /// Number of dispatches so far (retries included).
    pub attempts: u32,
}

impl Part {
    /// Creates a pending part for `range`.
    pub fn new(range: PartRange) -> Self {
        Self {
            range,
            status: PartStatus::Pending,
            entity_tag: None,
            bytes_sent: 0,
            attempts: 0,
        }
    }

    /// One-based part number.
    pub fn part_number(&self) -> u32 {
        self.range.part_number()
    }

    /// Starts a new attempt. Progress from a previous attempt is discarded.
    pub fn mark_in_flight(&mut self) {
        self.status = PartStatus::InFlight;
        self.attempts += 1;
        self.bytes_sent = 0;
    }

    /// Records cumulative progress for the current attempt, clamped to the part length.
    pub fn set_bytes_sent(&mut self, bytes: u64) {
        self.bytes_sent = bytes.min(self.range.len());
    }

    /// Marks the part stored under `entity_tag`.
    pub fn mark_done(&mut self, entity_tag: String) {
        self.status = PartStatus::Done;
        self.entity_tag = Some(entity_tag);
        self.bytes_sent = self.range.len();
    }

    pub fn mark_failed(&mut self) {
        self.status = PartStatus::Failed;
    }

    pub fn is_done(&self) -> bool {
        self.status == PartStatus::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(index: usize, start: u64, end: u64) -> PartRange {
        PartRange { index, start, end }
    }

    #[test]
    fn new_part_is_pending() {
        let part = Part::new(range(0, 0, 10));
        assert_eq!(part.status, PartStatus::Pending);
        assert_eq!(part.part_number(), 1);
        assert_eq!(part.attempts, 0);
        assert!(part.entity_tag.is_none());
    }

    #[test]
    fn retry_resets_progress() {
        let mut part = Part::new(range(2, 20, 30));
        part.mark_in_flight();
        part.set_bytes_sent(7);
        assert_eq!(part.bytes_sent, 7);

        part.mark_in_flight();
        assert_eq!(part.bytes_sent, 0);
        assert_eq!(part.attempts, 2);
    }

    #[test]
    fn progress_is_clamped_to_part_length() {
        let mut part = Part::new(range(0, 0, 10));
        part.mark_in_flight();
        part.set_bytes_sent(25);
        assert_eq!(part.bytes_sent, 10);
    }

    #[test]
    fn done_records_tag_and_full_length() {
        let mut part = Part::new(range(1, 10, 20));
        part.mark_in_flight();
        part.mark_done("\"etag-2\"".into());
        assert!(part.is_done());
        assert_eq!(part.bytes_sent, 10);
        assert_eq!(part.entity_tag.as_deref(), Some("\"etag-2\""));
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PartStatus::InFlight).unwrap(),
            "\"in_flight\""
        );
    }
}
