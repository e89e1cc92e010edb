//! Boot card deck construction, mirroring `CardsBuilder`: alternating
//! data/instruction card pairs terminated by `DATA 0` / `EXEC TXR`.

use isa::{encode_instr, OP_STORE_R1, OP_TXR};
use tape_device::Tape;

/// Builds a boot card deck onto any [`Tape`].
pub struct CardDeckBuilder<'a, T: Tape + ?Sized> {
    cards: &'a mut T,
}

impl<'a, T: Tape + ?Sized> CardDeckBuilder<'a, T> {
    pub fn new(cards: &'a mut T) -> Self {
        Self { cards }
    }

    /// Emit a `(DATA word, EXEC STORE_R1 addr)` card pair: the odd card
    /// loads `word` into `r1`, the even card stores it to `addr`.
    ///
    /// # Panics
    /// Panics if `store_addr` is negative, mirroring the reference tool's
    /// guard (the engine itself would reject it as an addressing error).
    pub fn append_pair_store(&mut self, word: i64, store_addr: i64) -> &mut Self {
        assert!(store_addr >= 0, "STORE_R1 address must be non-negative");
        self.cards.append_word(word);
        self.append_bits(encode_instr(OP_STORE_R1, store_addr));
        self
    }

    /// Emit the terminating `(DATA 0, EXEC TXR start_addr)` pair that hands
    /// control to the scratchpad program.
    pub fn finalize_boot(&mut self, start_addr: i64) -> &mut Self {
        self.cards.append_word(0);
        self.append_bits(encode_instr(OP_TXR, start_addr));
        self
    }

    /// Append a raw 48-bit instruction word, never through the signed data
    /// path.
    fn append_bits(&mut self, bits48: u64) {
        let idx = self.cards.record_count();
        self.cards.write_bits(idx, bits48);
    }
}
