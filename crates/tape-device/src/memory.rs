//! In-memory tape backing store.
//!
//! Unlike the reference machine's always-file-backed tapes, records live in
//! a `Vec<u64>` for the lifetime of the device; explicit [`InMemoryTape::from_bytes`]
//! and [`InMemoryTape::to_bytes`] mark the persistence boundary instead of
//! every read/write hitting disk.

use word_math::{bytes_to_word, word_to_bytes, BYTE_PER_WORD, WORD_MASK};

use crate::{FastForwardable, Positioned, Rewindable, Tape};

/// A tape held entirely in memory as a vector of raw 48-bit records.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTape {
    records: Vec<u64>,
    /// Record index last touched by a read, write, rewind, or fast-forward.
    position: u64,
}

impl InMemoryTape {
    /// An empty tape.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tape pre-loaded with the given raw words.
    #[must_use]
    pub fn from_words(records: Vec<u64>) -> Self {
        Self {
            records: records.into_iter().map(|w| w & WORD_MASK).collect(),
            position: 0,
        }
    }

    /// Decode a tape's on-disk 6-byte-per-record big-endian image.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let records = bytes
            .chunks_exact(BYTE_PER_WORD)
            .map(|chunk| {
                let mut buf = [0u8; BYTE_PER_WORD];
                buf.copy_from_slice(chunk);
                bytes_to_word(&buf)
            })
            .collect();
        Self::from_words(records)
    }

    /// Encode the tape to its on-disk 6-byte-per-record big-endian image.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.records.len() * BYTE_PER_WORD);
        for &word in &self.records {
            out.extend_from_slice(&word_to_bytes(word));
        }
        out
    }

    fn ensure_len(&mut self, n: usize) {
        if self.records.len() < n {
            self.records.resize(n, 0);
        }
    }

    fn mark(&mut self, index: u64) {
        let max_idx = self.record_count().saturating_sub(1);
        self.position = index.min(max_idx);
    }
}

impl Tape for InMemoryTape {
    fn read_bits(&mut self, index: u64) -> Option<u64> {
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| self.records.get(i))
            .copied();
        self.mark(index);
        value
    }

    fn write_bits(&mut self, index: u64, bits: u64) {
        let i = usize::try_from(index).expect("tape index fits in usize");
        self.ensure_len(i + 1);
        self.records[i] = bits & WORD_MASK;
        self.mark(index);
    }

    fn append_word(&mut self, value: i64) -> u64 {
        let idx = self.records.len() as u64;
        self.write_word(idx, value);
        idx
    }

    fn record_count(&self) -> u64 {
        self.records.len() as u64
    }
}

impl Rewindable for InMemoryTape {
    fn rewind(&mut self) {
        self.position = 0;
    }
}

impl FastForwardable for InMemoryTape {
    fn fast_forward(&mut self, count: i64) {
        let delta = count.max(0) as u64;
        let new_pos = self.position.saturating_add(delta).min(self.record_count());
        self.position = new_pos;
    }
}

impl Positioned for InMemoryTape {
    fn get_position(&self) -> u64 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_bits_zero_fills_gap() {
        let mut tape = InMemoryTape::new();
        tape.write_bits(3, 0xABC);
        assert_eq!(tape.record_count(), 4);
        assert_eq!(tape.read_bits(0), Some(0));
        assert_eq!(tape.read_bits(3), Some(0xABC));
    }

    #[test]
    fn read_past_end_is_none() {
        let mut tape = InMemoryTape::new();
        assert_eq!(tape.read_bits(0), None);
    }

    #[test]
    fn append_word_round_trips_signed_value() {
        let mut tape = InMemoryTape::new();
        let idx = tape.append_word(-42);
        assert_eq!(tape.read_word(idx), -42);
    }

    #[test]
    fn byte_round_trip_preserves_records() {
        let mut tape = InMemoryTape::new();
        tape.append_word(1);
        tape.append_word(-1);
        tape.append_word(0x7FFF_FFFF_FFFF);
        let bytes = tape.to_bytes();
        let mut restored = InMemoryTape::from_bytes(&bytes);
        assert_eq!(restored.read_word(0), 1);
        assert_eq!(restored.read_word(1), -1);
        assert_eq!(restored.read_word(2), 0x7FFF_FFFF_FFFF);
    }

    #[test]
    fn fast_forward_clamps_to_end() {
        let mut tape = InMemoryTape::new();
        tape.append_word(1);
        tape.append_word(2);
        tape.fast_forward(100);
        assert_eq!(tape.get_position(), 2);
    }

    #[test]
    fn rewind_resets_position() {
        let mut tape = InMemoryTape::new();
        tape.append_word(1);
        tape.read_bits(0);
        tape.rewind();
        assert_eq!(tape.get_position(), 0);
    }
}
