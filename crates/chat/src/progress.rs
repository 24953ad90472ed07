/// Download state of one weight file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEntry {
    pub file_id: String,
    pub bytes_done: u64,
    pub bytes_total: u64,
}

impl ProgressEntry {
    pub fn fraction(&self) -> f64 {
        if self.bytes_total == 0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.bytes_total as f64
    }
}

/// What a finished download means for the rest of the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCompletion {
    /// The file was never started; nothing changed.
    Untracked,
    /// Files still downloading. Zero when a batch started after the model
    /// reported ready has drained again.
    Remaining(usize),
    /// The download set drained for the first time.
    AllComplete,
}

/// Per-file download tracker for one generation session.
///
/// Entries stay in start order. The all-complete signal fires once, on the
/// first transition from non-empty to empty.
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    entries: Vec<ProgressEntry>,
    started_any: bool,
    completed: bool,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `file_id`. A repeated start refreshes its total.
    pub fn on_file_start(&mut self, file_id: &str, bytes_total: u64) -> ProgressEntry {
        self.started_any = true;
        if self.completed {
            tracing::debug!(file_id, "file started after model reported ready");
        }

        if let Some(entry) = self.entry_mut(file_id) {
            entry.bytes_total = bytes_total;
            return entry.clone();
        }

        let entry = ProgressEntry {
            file_id: file_id.to_string(),
            bytes_done: 0,
            bytes_total,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Records loaded bytes, clamped to the known total.
    ///
    /// Progress for a file that was never started registers it with an
    /// unknown total so late `FileInitiate` callbacks are not lost.
    pub fn on_file_progress(&mut self, file_id: &str, bytes_done: u64) -> ProgressEntry {
        if self.entry_mut(file_id).is_none() {
            self.on_file_start(file_id, 0);
        }

        match self.entry_mut(file_id) {
            Some(entry) => {
                entry.bytes_done = if entry.bytes_total > 0 {
                    bytes_done.min(entry.bytes_total)
                } else {
                    bytes_done
                };
                entry.clone()
            }
            None => ProgressEntry {
                file_id: file_id.to_string(),
                bytes_done,
                bytes_total: 0,
            },
        }
    }

    /// Removes `file_id`. Only the first drain of the set reports
    /// [`FileCompletion::AllComplete`].
    pub fn on_file_done(&mut self, file_id: &str) -> FileCompletion {
        let Some(position) = self.entries.iter().position(|entry| entry.file_id == file_id) else {
            tracing::debug!(file_id, "done for untracked file ignored");
            return FileCompletion::Untracked;
        };
        self.entries.remove(position);

        if self.entries.is_empty() && self.started_any && !self.completed {
            self.completed = true;
            return FileCompletion::AllComplete;
        }

        FileCompletion::Remaining(self.entries.len())
    }

    pub fn snapshot(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn pending_files(&self) -> usize {
        self.entries.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Byte-weighted completion of the files still downloading.
    pub fn overall_fraction(&self) -> f64 {
        let (done, total) = self
            .entries
            .iter()
            .fold((0_u64, 0_u64), |(done, total), entry| {
                (done + entry.bytes_done, total + entry.bytes_total)
            });
        if total == 0 {
            return if self.entries.is_empty() { 1.0 } else { 0.0 };
        }
        done as f64 / total as f64
    }

    fn entry_mut(&mut self, file_id: &str) -> Option<&mut ProgressEntry> {
        self.entries.iter_mut().find(|entry| entry.file_id == file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_complete_fires_once_after_last_file() {
        let mut progress = ProgressAggregator::new();
        progress.on_file_start("a", 10);
        progress.on_file_start("b", 10);

        assert_eq!(progress.on_file_done("a"), FileCompletion::Remaining(1));
        assert_eq!(progress.on_file_done("b"), FileCompletion::AllComplete);
        assert!(progress.is_complete());

        progress.on_file_start("c", 5);
        progress.on_file_start("d", 5);
        assert_eq!(progress.on_file_done("c"), FileCompletion::Remaining(1));
        assert_eq!(progress.on_file_done("d"), FileCompletion::Remaining(0));
        assert_eq!(progress.on_file_done("d"), FileCompletion::Untracked);
    }

    #[test]
    fn unknown_done_is_a_no_op() {
        let mut progress = ProgressAggregator::new();
        assert_eq!(progress.on_file_done("ghost"), FileCompletion::Untracked);
        assert!(!progress.is_complete());

        progress.on_file_start("a", 4);
        assert_eq!(progress.on_file_done("ghost"), FileCompletion::Untracked);
        assert_eq!(progress.pending_files(), 1);
    }

    #[test]
    fn progress_is_clamped_and_kept_in_start_order() {
        let mut progress = ProgressAggregator::new();
        progress.on_file_start("model.onnx", 100);
        progress.on_file_start("tokenizer.json", 20);

        let entry = progress.on_file_progress("model.onnx", 150);
        assert_eq!(entry.bytes_done, 100);
        assert_eq!(entry.fraction(), 1.0);

        progress.on_file_progress("tokenizer.json", 10);
        let ids = progress
            .snapshot()
            .iter()
            .map(|entry| entry.file_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["model.onnx", "tokenizer.json"]);
        assert!((progress.overall_fraction() - 110.0 / 120.0).abs() < 1e-9);
    }

    #[test]
    fn progress_before_start_registers_file() {
        let mut progress = ProgressAggregator::new();
        let entry = progress.on_file_progress("late.bin", 7);
        assert_eq!(entry.bytes_done, 7);
        assert_eq!(progress.pending_files(), 1);

        progress.on_file_start("late.bin", 10);
        assert_eq!(progress.snapshot()[0].bytes_done, 7);
        assert_eq!(progress.on_file_done("late.bin"), FileCompletion::AllComplete);
    }
}
