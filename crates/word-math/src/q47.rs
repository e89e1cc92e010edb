//! Q47 fixed-point conversions.

use crate::clamp_word;

/// Number of fractional bits in a Q47 value.
pub const FRAC_BITS: u32 = 47;

fn scale() -> f64 {
    2f64.powi(FRAC_BITS as i32)
}

/// Convert a real number in `[-1.0, 1.0 - 2^-47]` to its Q47 encoding.
///
/// Values outside that range are clamped before rounding to the nearest
/// representable integer (`x * 2^47`).
#[must_use]
pub fn float_to_q47(x: f64) -> i64 {
    let upper = 1.0 - 1.0 / scale();
    let x = if x >= 1.0 {
        upper
    } else if x < -1.0 {
        -1.0
    } else {
        x
    };
    clamp_word((x * scale()).round() as i64)
}

/// Decode a Q47 word to its real-number value.
#[must_use]
pub fn q47_to_float(val: i64) -> f64 {
    val as f64 / scale()
}
