use crate::{AppError, Result};

/// Pending download URLs, FIFO. Duplicates are allowed; order is what the
/// user built. Owned by the interface thread: the worker only ever sees a
/// start-of-run snapshot, and removal happens here as item-finished events
/// are drained.
#[derive(Debug, Default)]
pub struct QueueStore {
    entries: Vec<String>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, url: &str) -> Result<()> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(AppError::EmptyUrl);
        }
        self.entries.push(trimmed.to_string());
        Ok(())
    }

    /// Removes by position, highest index first so the remaining positions
    /// stay valid during a multi-removal. Out-of-range and duplicate indices
    /// are ignored.
    pub fn remove(&mut self, indices: &[usize]) {
        let mut sorted: Vec<usize> = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        sorted.dedup();
        for index in sorted {
            if index < self.entries.len() {
                self.entries.remove(index);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn pop_front(&mut self) -> Option<String> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.entries.remove(0))
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.clone()
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
