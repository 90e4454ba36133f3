//! In-memory view of a download: the range plan, dispatch cursor and
//! committed progress.
use crate::error::{DownloadError, Result};
use crate::state::{DownloadProgress, Range};
use crate::utils;

/// Wraps the persisted [`DownloadProgress`] with everything derived from the
/// freshly probed file size.
#[derive(Debug)]
pub struct DownloadMetadata {
    progress: DownloadProgress,
    total_file_size: u64,
    /// Planned `[start, end)` per worker.
    bounds: Vec<(u64, u64)>,
    /// What is left to fetch per worker, fixed at construction.
    remaining: Vec<Option<Range>>,
    cursor: usize,
}

impl DownloadMetadata {
    /// Combines persisted progress with the probed size.
    ///
    /// The worker count is taken from `progress.ranges.len()`.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::RemoteChanged`] when the progress cannot belong
    /// to a file of `total_file_size` bytes: fewer bytes than already committed,
    /// or range starts that differ from the plan. Returns
    /// [`DownloadError::CorruptProgress`] when the byte count disagrees with the
    /// per-range marks.
    pub fn new(progress: DownloadProgress, total_file_size: u64) -> Result<Self> {
        let workers = progress.ranges.len();
        if workers == 0 {
            return Err(DownloadError::RemoteChanged(
                "metadata has no ranges".to_string(),
            ));
        }
        if progress.committed_bytes() != progress.bytes_downloaded {
            return Err(DownloadError::CorruptProgress(format!(
                "ranges commit {} bytes but {} are recorded",
                progress.committed_bytes(),
                progress.bytes_downloaded
            )));
        }
        if progress.bytes_downloaded > total_file_size {
            return Err(DownloadError::RemoteChanged(format!(
                "{} bytes already committed but the remote file is {} bytes",
                progress.bytes_downloaded, total_file_size
            )));
        }

        let mut bounds = Vec::with_capacity(workers);
        let mut remaining = Vec::with_capacity(workers);
        for (i, committed) in progress.ranges.iter().enumerate() {
            let (start, end) = utils::planned_bounds(i, workers, total_file_size);
            if committed.start != start || committed.next < start || committed.next > end {
                return Err(DownloadError::RemoteChanged(format!(
                    "range {i} was committed up to {} from {} but the plan for {} bytes is {}..{}",
                    committed.next, committed.start, total_file_size, start, end
                )));
            }
            bounds.push((start, end));
            remaining.push(end.checked_sub(1).and_then(|last| Range::new(committed.next, last)));
        }

        Ok(Self {
            progress,
            total_file_size,
            bounds,
            remaining,
            cursor: 0,
        })
    }

    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    pub fn worker_count(&self) -> usize {
        self.bounds.len()
    }

    pub fn bytes_downloaded(&self) -> u64 {
        self.progress.bytes_downloaded
    }

    pub fn progress(&self) -> &DownloadProgress {
        &self.progress
    }

    /// The full planned range of worker `index`, or `None` if it is empty.
    pub fn plan_range(&self, index: usize) -> Option<Range> {
        let (start, end) = *self.bounds.get(index)?;
        end.checked_sub(1).and_then(|last| Range::new(start, last))
    }

    /// What worker `index` still has to fetch, or `None` if its range was
    /// already complete when this run started.
    pub fn remaining_range(&self, index: usize) -> Option<Range> {
        self.remaining.get(index).copied().flatten()
    }

    /// Hands out the next range that still has bytes to fetch.
    ///
    /// Each range is returned at most once; fully downloaded ranges are skipped.
    pub fn next_unassigned_range(&mut self) -> Option<(usize, Range)> {
        while self.cursor < self.remaining.len() {
            let index = self.cursor;
            self.cursor += 1;
            if let Some(range) = self.remaining[index] {
                return Some((index, range));
            }
        }
        None
    }

    /// Moves a range's high-water mark past a chunk that was just written.
    ///
    /// # Errors
    ///
    /// [`DownloadError::UnexpectedChunk`] when the chunk does not start exactly
    /// at the high-water mark of the range that contains it. Nothing changes
    /// in that case.
    pub fn record_written(&mut self, offset: u64, length: u64) -> Result<()> {
        if length == 0 {
            return Ok(());
        }
        let index = self.range_for_chunk(offset, length)?;
        self.progress.ranges[index].next = offset + length;
        self.progress.bytes_downloaded += length;
        Ok(())
    }

    /// Index of the range a chunk would extend, without recording anything.
    ///
    /// # Errors
    ///
    /// Same conditions as [`record_written`](Self::record_written).
    pub fn range_for_chunk(&self, offset: u64, length: u64) -> Result<usize> {
        let unexpected = || DownloadError::UnexpectedChunk { offset, length };
        let last = length
            .checked_sub(1)
            .and_then(|n| offset.checked_add(n))
            .ok_or_else(unexpected)?;

        let index = self
            .bounds
            .iter()
            .position(|&(start, end)| start <= offset && last < end)
            .ok_or_else(unexpected)?;

        if self.progress.ranges[index].next != offset {
            return Err(unexpected());
        }
        Ok(index)
    }

    pub fn is_complete(&self) -> bool {
        self.progress.bytes_downloaded >= self.total_file_size
    }

    /// Whole percent of the file committed so far.
    pub fn completion_percentage(&self) -> u8 {
        if self.total_file_size == 0 {
            return 100;
        }
        let percent = u128::from(self.progress.bytes_downloaded) * 100
            / u128::from(self.total_file_size);
        percent.min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::CommittedRange;

    fn fresh(total: u64, workers: usize) -> DownloadMetadata {
        let starts: Vec<u64> = (0..workers)
            .map(|i| utils::planned_bounds(i, workers, total).0)
            .collect();
        let progress = DownloadProgress::new("f".into(), "http://h/f".into(), &starts);
        DownloadMetadata::new(progress, total).unwrap()
    }

    #[test]
    fn test_thousand_bytes_four_workers() {
        let mut md = fresh(1000, 4);
        let mut dispatched = Vec::new();
        while let Some((i, r)) = md.next_unassigned_range() {
            dispatched.push((i, r.start, r.end));
        }
        assert_eq!(
            dispatched,
            vec![(0, 0, 249), (1, 250, 499), (2, 500, 749), (3, 750, 999)]
        );
        assert!(md.next_unassigned_range().is_none());
        assert_eq!(md.plan_range(3), Range::new(750, 999));
    }

    #[test]
    fn test_resume_dispatches_only_the_uncommitted_tail() {
        let mut progress = DownloadProgress::new("f".into(), "u".into(), &[0, 250, 500, 750]);
        progress.ranges[0].next = 250; // worker 0 done
        progress.ranges[2].next = 600;
        progress.bytes_downloaded = 250 + 100;

        let mut md = DownloadMetadata::new(progress, 1000).unwrap();
        assert_eq!(md.remaining_range(0), None);
        assert_eq!(md.remaining_range(2), Range::new(600, 749));

        let dispatched: Vec<_> = std::iter::from_fn(|| md.next_unassigned_range()).collect();
        assert_eq!(
            dispatched,
            vec![
                (1, Range { start: 250, end: 499 }),
                (2, Range { start: 600, end: 749 }),
                (3, Range { start: 750, end: 999 }),
            ]
        );
    }

    #[test]
    fn test_record_written_advances_high_water_mark() {
        let mut md = fresh(1000, 4);
        md.record_written(500, 60).unwrap();
        md.record_written(560, 40).unwrap();
        md.record_written(0, 250).unwrap();

        assert_eq!(md.progress().ranges[2], CommittedRange { start: 500, next: 600 });
        assert_eq!(md.progress().ranges[0].next, 250);
        assert_eq!(md.bytes_downloaded(), 350);
        assert_eq!(md.progress().committed_bytes(), md.bytes_downloaded());
        assert_eq!(md.completion_percentage(), 35);
        assert!(!md.is_complete());
    }

    #[test]
    fn test_record_written_rejects_gaps_and_strays() {
        let mut md = fresh(1000, 4);
        // Not at the high-water mark of range 1.
        assert!(matches!(
            md.record_written(300, 10),
            Err(DownloadError::UnexpectedChunk { offset: 300, .. })
        ));
        // Straddles ranges 0 and 1.
        assert!(md.record_written(200, 100).is_err());
        // Past the end of the file.
        assert!(md.record_written(995, 10).is_err());
        assert_eq!(md.bytes_downloaded(), 0);
    }

    #[test]
    fn test_bytes_downloaded_is_monotonic_until_complete() {
        let mut md = fresh(10, 3);
        let mut last = md.bytes_downloaded();
        for (offset, len) in [(0, 2), (3, 3), (2, 1), (6, 4)] {
            md.record_written(offset, len).unwrap();
            assert!(md.bytes_downloaded() >= last);
            last = md.bytes_downloaded();
        }
        assert!(md.is_complete());
        assert_eq!(md.completion_percentage(), 100);
    }

    #[test]
    fn test_shrunk_remote_is_rejected() {
        let mut progress = DownloadProgress::new("f".into(), "u".into(), &[0, 250, 500, 750]);
        progress.ranges[3].next = 900;
        progress.bytes_downloaded = 150;

        // Different size: the plan no longer matches the persisted starts.
        assert!(matches!(
            DownloadMetadata::new(progress.clone(), 800),
            Err(DownloadError::RemoteChanged(_))
        ));
        // Smaller than what is already committed.
        assert!(matches!(
            DownloadMetadata::new(progress, 100),
            Err(DownloadError::RemoteChanged(_))
        ));
    }

    #[test]
    fn test_byte_count_must_match_range_marks() {
        let mut progress = DownloadProgress::new("f".into(), "u".into(), &[0, 500]);
        progress.ranges[1].next = 600;
        progress.bytes_downloaded = 1000;

        assert!(matches!(
            DownloadMetadata::new(progress.clone(), 1000),
            Err(DownloadError::CorruptProgress(_))
        ));

        progress.bytes_downloaded = 100;
        let md = DownloadMetadata::new(progress, 1000).unwrap();
        assert!(!md.is_complete());
    }

    #[test]
    fn test_plan_covers_file_without_gaps_or_overlaps() {
        for size in [1u64, 2, 7, 100, 1000, 4097, 65_537] {
            for requested in 1..=9usize {
                let workers = utils::effective_workers(requested, size);
                let md = fresh(size, workers);

                let mut expected_start = 0;
                for i in 0..md.worker_count() {
                    let r = md.plan_range(i).expect("clamped plan has no empty ranges");
                    assert_eq!(r.start, expected_start, "gap or overlap at {size}/{workers}");
                    expected_start = r.end + 1;
                }
                assert_eq!(expected_start, size);
            }
        }
    }

    #[test]
    fn test_empty_file_is_complete_immediately() {
        let mut md = fresh(0, 1);
        assert!(md.is_complete());
        assert_eq!(md.completion_percentage(), 100);
        assert!(md.next_unassigned_range().is_none());
    }
}
