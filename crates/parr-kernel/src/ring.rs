//! Output ring — a per-stream last-N-characters buffer.
//!
//! Child output is captured into one ring per stream. The ring keeps the
//! *last* `capacity` characters seen (errors show up at the end of a run),
//! counts everything ever written, and flags truncation. Memory stays O(N)
//! no matter how much the child prints.
//!
//! Byte chunks arrive straight off a pipe, so a chunk may end mid UTF-8
//! sequence; up to three trailing bytes are carried into the next push and
//! genuinely invalid sequences decode as U+FFFD.

use std::collections::VecDeque;

use parr_types::CapturedOutput;

/// Last-N-characters ring buffer for one output stream.
#[derive(Debug)]
pub struct OutputRing {
    chars: VecDeque<char>,
    capacity: usize,
    total_chars: u64,
    /// Incomplete trailing UTF-8 sequence from the previous chunk.
    carry: Vec<u8>,
}

impl OutputRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            chars: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
            total_chars: 0,
            carry: Vec::new(),
        }
    }

    /// Append a chunk of raw bytes from the child's pipe.
    pub fn push(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }
        let bytes: Vec<u8> = if self.carry.is_empty() {
            chunk.to_vec()
        } else {
            let mut joined = std::mem::take(&mut self.carry);
            joined.extend_from_slice(chunk);
            joined
        };

        let mut rest = bytes.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.push_chars(text.chars());
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    let (head, tail) = rest.split_at(valid);
                    if let Ok(text) = std::str::from_utf8(head) {
                        self.push_chars(text.chars());
                    }
                    match err.error_len() {
                        // Invalid sequence: emit a replacement char and skip it
                        Some(bad) => {
                            self.push_chars(std::iter::once(char::REPLACEMENT_CHARACTER));
                            rest = &tail[bad..];
                        }
                        // Incomplete trailing sequence: carry into next chunk
                        None => {
                            self.carry = tail.to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    fn push_chars(&mut self, chars: impl Iterator<Item = char>) {
        for c in chars {
            self.total_chars += 1;
            if self.chars.len() == self.capacity {
                self.chars.pop_front();
            }
            self.chars.push_back(c);
        }
    }

    /// Flush any carried partial sequence as a replacement character.
    /// Call once at end-of-stream.
    pub fn finish(&mut self) {
        if !self.carry.is_empty() {
            self.carry.clear();
            self.push_chars(std::iter::once(char::REPLACEMENT_CHARACTER));
        }
    }

    /// The retained tail as a string.
    pub fn text(&self) -> String {
        self.chars.iter().collect()
    }

    /// Total characters ever written.
    pub fn total_chars(&self) -> u64 {
        self.total_chars
    }

    /// True iff earlier content has been discarded.
    pub fn truncated(&self) -> bool {
        self.total_chars > self.capacity as u64
    }

    /// Snapshot into the result-record form.
    pub fn captured(&self) -> CapturedOutput {
        CapturedOutput {
            text: self.text(),
            total_chars: self.total_chars,
            truncated: self.truncated(),
        }
    }
}
