//! Cross-register (r1:r2) 96-bit operations: Q94 multiply/round and 96-bit
//! pair shifts, plus 48-bit rotation of a single register.

use crate::q47::FRAC_BITS;
use crate::{from_twos_complement, to_twos_complement, MAX_WORD, MIN_WORD, WORD_MASK};

const PAIR_MASK: u128 = (1u128 << 96) - 1;
const PAIR_SIGN: u128 = 1u128 << 95;

fn pair_bits(high: i64, low: i64) -> u128 {
    ((u128::from(to_twos_complement(high))) << 48 | u128::from(to_twos_complement(low))) & PAIR_MASK
}

fn split_pair(bits: u128) -> (i64, i64) {
    let bits = bits & PAIR_MASK;
    let high = from_twos_complement(((bits >> 48) & u128::from(WORD_MASK)) as u64);
    let low = from_twos_complement((bits & u128::from(WORD_MASK)) as u64);
    (high, low)
}

/// Multiply two Q47 values, producing the full signed 96-bit Q94 product
/// split across `(high, low)` 48-bit halves.
#[must_use]
pub fn mul_q47_pair(a: i64, b: i64) -> (i64, i64) {
    let prod = i128::from(a) * i128::from(b);
    let min96 = -(1i128 << 95);
    let max96 = (1i128 << 95) - 1;
    let prod = prod.clamp(min96, max96);

    let bits = if prod < 0 {
        ((((-prod) as u128) ^ PAIR_MASK).wrapping_add(1)) & PAIR_MASK
    } else {
        (prod as u128) & PAIR_MASK
    };
    split_pair(bits)
}

/// Round a Q94 value stored across `(high, low)` to a single Q47 value,
/// rounding half away from zero.
#[must_use]
pub fn round_q94_to_q47(high: i64, low: i64) -> i64 {
    let bits = pair_bits(high, low);
    let mut value = if bits & PAIR_SIGN != 0 {
        -((((!bits) & PAIR_MASK) + 1) as i128)
    } else {
        bits as i128
    };

    let half = 1i128 << (FRAC_BITS - 1);
    value += if value >= 0 { half } else { -half };

    let shifted = value >> FRAC_BITS;
    let min = -(1i128 << 47);
    let max = (1i128 << 47) - 1;
    shifted.clamp(min, max) as i64
}

/// Logical shift of the `(high, low)` pair treated as a 96-bit bit pattern
/// (not an arithmetic value). `count` is clamped to `[0, 95]`; negative
/// counts become 0.
#[must_use]
pub fn shift_pair_96(left: bool, count: i64, high: i64, low: i64) -> (i64, i64) {
    let count = count.clamp(0, 95) as u32;
    let combined = pair_bits(high, low);
    let shifted = if left {
        (combined << count) & PAIR_MASK
    } else {
        combined >> count
    };
    split_pair(shifted)
}

/// Divide `numerator << FRAC_BITS` by `denom` and clamp to 48 bits, for
/// `OP_DIV`. Widens to `i128` before shifting — the shifted numerator needs
/// up to 95 bits, the same order of magnitude [`mul_q47_pair`] widens for —
/// and uses floor division (rounds toward negative infinity) rather than
/// Rust's truncating `/`, matching the reference interpreter's `//`.
///
/// `denom` must be nonzero; callers handle the zero-divisor saturation case
/// themselves.
#[must_use]
pub fn div_q47_scaled(numerator: i64, denom: i64) -> i64 {
    let num = i128::from(numerator) << FRAC_BITS;
    let den = i128::from(denom);
    let q = num / den;
    let r = num % den;
    let q = if r != 0 && (r < 0) != (den < 0) { q - 1 } else { q };
    q.clamp(i128::from(MIN_WORD), i128::from(MAX_WORD)) as i64
}

/// Circular 48-bit rotation of a single register.
#[must_use]
pub fn rotate48(left: bool, count: i64, value: i64) -> i64 {
    let count = count.rem_euclid(48) as u32;
    if count == 0 {
        return value;
    }
    let val = to_twos_complement(value);
    let rotated = if left {
        ((val << count) | (val >> (48 - count))) & WORD_MASK
    } else {
        ((val >> count) | (val << (48 - count))) & WORD_MASK
    };
    from_twos_complement(rotated)
}
