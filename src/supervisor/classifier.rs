//! Best-effort success/failure classification from the agent's output.
//!
//! The supervisor cannot verify that a GUI task really succeeded; it can only
//! trust the agent's own vocabulary and its exit code.

use super::driver::trim_to_tail;

/// Markers the classifier looks for, matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    pub completion: Vec<String>,
    pub error: Vec<String>,
    /// How much trailing output is kept for the completion check.
    pub tail_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Completed,
    Failed(String),
}

pub struct OutputClassifier {
    completion: Vec<String>,
    error: Vec<String>,
    tail_bytes: usize,
    // Lowercased trailing output.
    tail: String,
    error_seen: Option<String>,
}

impl OutputClassifier {
    pub fn new(markers: MarkerSet) -> Self {
        let lower = |v: Vec<String>| -> Vec<String> {
            v.into_iter()
                .filter(|m| !m.is_empty())
                .map(|m| m.to_lowercase())
                .collect()
        };
        let error = lower(markers.error);
        let longest_error = error.iter().map(String::len).max().unwrap_or(0);
        Self {
            completion: lower(markers.completion),
            error,
            // The tail must be able to hold an error marker split across chunks.
            tail_bytes: markers.tail_bytes.max(longest_error),
            tail: String::new(),
            error_seen: None,
        }
    }

    /// Feed a chunk of output. Returns the error marker the first time one appears.
    pub fn observe(&mut self, chunk: &str) -> Option<String> {
        let boundary = self.tail.len();
        self.tail.push_str(&chunk.to_lowercase());

        let mut detected = None;
        if self.error_seen.is_none() {
            detected = self
                .error
                .iter()
                .find(|marker| {
                    // Only occurrences that end inside the new chunk are new.
                    let from = boundary.saturating_sub(marker.len().saturating_sub(1));
                    let from = floor_char_boundary(&self.tail, from);
                    self.tail[from..].contains(marker.as_str())
                })
                .cloned();
            if detected.is_some() {
                self.error_seen = detected.clone();
            }
        }

        trim_to_tail(&mut self.tail, self.tail_bytes);
        detected
    }

    pub fn error_seen(&self) -> Option<&str> {
        self.error_seen.as_deref()
    }

    /// Whether a completion marker is present in the trailing output.
    pub fn completion_seen(&self) -> bool {
        self.completion
            .iter()
            .any(|marker| self.tail.contains(marker.as_str()))
    }

    /// Final verdict once the process has exited.
    ///
    /// `exit_code` is `None` when the process was ended by a signal.
    pub fn verdict(&self, exit_code: Option<i32>) -> Verdict {
        if let Some(marker) = self.error_seen() {
            return Verdict::Failed(format!("Agent reported an error: {marker}"));
        }
        match exit_code {
            Some(0) if self.completion_seen() => Verdict::Completed,
            Some(0) => Verdict::Failed(
                "Agent output ended without a completion marker".to_string(),
            ),
            Some(code) => Verdict::Failed(format!("Process exited with code {code}")),
            None => Verdict::Failed("Process was terminated by a signal".to_string()),
        }
    }
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
