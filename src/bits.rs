use crate::{PsiError, Result};

/// Width of the IEEE-754 binary32 encoding.
pub const FLOAT_BITS: usize = 32;

/// Unpack a float into its binary32 bits, most-significant bit first.
pub fn float_to_bits(x: f32) -> Vec<bool> {
    let raw = x.to_bits();
    (0..FLOAT_BITS)
        .map(|i| (raw >> (FLOAT_BITS - 1 - i)) & 1 == 1)
        .collect()
}

/// Parse a brace-enclosed set of floats, e.g. `"{1.2, 4.5e2}"`.
///
/// Whitespace around elements is ignored and an empty interior yields the
/// empty set. Duplicates are collapsed by bit pattern, so two NaNs with the
/// same payload count as one value while `0.0` and `-0.0` stay distinct.
pub fn parse_set(s: &str) -> Result<Vec<f32>> {
    let inner = s
        .trim()
        .strip_prefix('{')
        .and_then(|rest| rest.strip_suffix('}'))
        .ok_or_else(|| PsiError::Config(format!("set must be brace-enclosed, got {s:?}")))?;

    let mut vals: Vec<f32> = Vec::new();
    if inner.trim().is_empty() {
        return Ok(vals);
    }
    for item in inner.split(',') {
        let item = item.trim();
        let v: f32 = item
            .parse()
            .map_err(|_| PsiError::Config(format!("not a 32-bit float: {item:?}")))?;
        if !contains_bitwise(&vals, v) {
            vals.push(v);
        }
    }
    Ok(vals)
}

/// Render a set the way the result is printed: `{v1, v2, ...}`.
pub fn format_set(vals: &[f32]) -> String {
    let items: Vec<String> = vals.iter().map(|v| v.to_string()).collect();
    format!("{{{}}}", items.join(", "))
}

/// Membership by binary32 encoding. Equality throughout the protocol is
/// bitwise: the circuit compares encodings, so the clear-text side must too.
pub fn contains_bitwise(set: &[f32], v: f32) -> bool {
    set.iter().any(|w| w.to_bits() == v.to_bits())
}
