//! Scrubbing of known sensitive strings from text bound for the host.
//!
//! The failure message of a run is the only text that leaves the process on
//! the error path, and it is built from transport and server errors we do not
//! control. Every value registered here is replaced with [`REDACTED`] before
//! the message is handed to the host.

use std::fmt;

use zeroize::Zeroizing;

/// Placeholder written in place of sensitive values.
pub const REDACTED: &str = "[REDACTED]";

/// Values shorter than this are not scrubbed; replacing one- or two-letter
/// substrings would mangle every message without protecting anything.
pub const MIN_SCRUB_LEN: usize = 4;

/// Set of sensitive strings to remove from outgoing text.
#[derive(Default)]
pub struct Scrubber {
    needles: Vec<Zeroizing<String>>,
}

impl Scrubber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sensitive value. Short and duplicate values are ignored.
    pub fn register(&mut self, value: &str) {
        if value.len() < MIN_SCRUB_LEN || self.needles.iter().any(|n| n.as_str() == value) {
            return;
        }
        self.needles.push(Zeroizing::new(value.to_owned()));
        // Longest first, so a value containing another is replaced whole.
        self.needles.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    /// Number of registered values.
    pub fn len(&self) -> usize {
        self.needles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.needles.is_empty()
    }

    /// Return `text` with every registered value replaced by [`REDACTED`].
    pub fn scrub(&self, text: &str) -> String {
        self.needles
            .iter()
            .fold(text.to_owned(), |acc, needle| acc.replace(needle.as_str(), REDACTED))
    }
}

impl fmt::Debug for Scrubber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scrubber")
            .field("values", &self.needles.len())
            .finish()
    }
}
