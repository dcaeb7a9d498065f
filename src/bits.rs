//! Bit-level conversions between device payloads and structured values.
//!
//! Bits are plain `bool`s ordered most-significant first. Text is treated as Latin-1: every
//! character maps to exactly one byte, so `bits_to_text(text_to_bits(s)) == s` for any string
//! whose characters fall in `0..=255`.

use crate::error::{AppResult, LoggerError};

/// Expand text into its bits, 8 per character, most significant bit first.
pub fn text_to_bits(text: &str) -> AppResult<Vec<bool>> {
    let mut bits = Vec::with_capacity(text.len() * 8);
    for ch in text.chars() {
        let code = u32::from(ch);
        let byte = u8::try_from(code).map_err(|_| {
            LoggerError::Decode(format!("character U+{code:04X} does not fit in one byte"))
        })?;
        push_byte(&mut bits, byte);
    }
    Ok(bits)
}

/// Collapse bits back into text, one character per 8-bit chunk.
pub fn bits_to_text(bits: &[bool]) -> AppResult<String> {
    if bits.len() % 8 != 0 {
        return Err(LoggerError::Decode(format!(
            "bit string of length {} is not a whole number of bytes",
            bits.len()
        )));
    }
    Ok(bits
        .chunks_exact(8)
        .map(|chunk| char::from(chunk_to_byte(chunk)))
        .collect())
}

/// Read bits as an unsigned integer, most significant bit first.
pub fn bits_to_uint(bits: &[bool]) -> AppResult<u64> {
    if bits.len() > 64 {
        return Err(LoggerError::Decode(format!(
            "{} bits do not fit in a 64-bit integer",
            bits.len()
        )));
    }
    Ok(bits
        .iter()
        .fold(0u64, |acc, &bit| (acc << 1) | u64::from(bit)))
}

/// Binary expansion of `value` in exactly `width` bits, most significant bit first.
///
/// Higher bits that do not fit in `width` are dropped.
pub fn uint_to_bits(value: u64, width: usize) -> Vec<bool> {
    (0..width)
        .rev()
        .map(|shift| shift < 64 && (value >> shift) & 1 == 1)
        .collect()
}

/// Unpack registers into bits, 16 per register, high byte first.
pub fn registers_to_bits(registers: &[u16]) -> Vec<bool> {
    let mut bits = Vec::with_capacity(registers.len() * 16);
    for register in registers {
        let [high, low] = register.to_be_bytes();
        push_byte(&mut bits, high);
        push_byte(&mut bits, low);
    }
    bits
}

fn push_byte(bits: &mut Vec<bool>, byte: u8) {
    bits.extend((0..8).rev().map(|shift| (byte >> shift) & 1 == 1));
}

fn chunk_to_byte(chunk: &[bool]) -> u8 {
    chunk
        .iter()
        .fold(0u8, |acc, &bit| (acc << 1) | u8::from(bit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn text_is_expanded_msb_first() {
        let bits = text_to_bits("A").unwrap();
        // 'A' = 0x41 = 0100_0001
        assert_eq!(
            bits,
            vec![false, true, false, false, false, false, false, true]
        );
    }

    #[test]
    fn characters_above_latin1_are_rejected() {
        let err = text_to_bits("Ω").unwrap_err();
        assert!(matches!(err, LoggerError::Decode(_)));
    }

    #[test]
    fn ragged_bit_strings_do_not_decode() {
        assert!(bits_to_text(&[true; 7]).is_err());
        assert_eq!(bits_to_text(&[]).unwrap(), "");
    }

    #[test]
    fn uint_packing() {
        assert_eq!(bits_to_uint(&[true, false, true]).unwrap(), 5);
        assert_eq!(bits_to_uint(&[]).unwrap(), 0);
        assert_eq!(uint_to_bits(5, 4), vec![false, true, false, true]);
        assert!(bits_to_uint(&[false; 65]).is_err());
    }

    #[test]
    fn registers_unpack_high_byte_first() {
        let bits = registers_to_bits(&[0x4142]);
        assert_eq!(bits_to_text(&bits).unwrap(), "AB");
    }

    proptest! {
        #[test]
        fn text_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let text: String = bytes.iter().map(|&b| char::from(b)).collect();
            let bits = text_to_bits(&text).unwrap();
            prop_assert_eq!(bits.len(), bytes.len() * 8);
            prop_assert_eq!(bits_to_text(&bits).unwrap(), text);
        }

        #[test]
        fn uint_round_trips(width in 1usize..=64, raw in any::<u64>()) {
            let value = if width == 64 { raw } else { raw & ((1u64 << width) - 1) };
            prop_assert_eq!(bits_to_uint(&uint_to_bits(value, width)).unwrap(), value);
        }
    }
}
