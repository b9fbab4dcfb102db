//! Hex helpers for map keys and values as typed on the command line.

use std::fmt::Write as _;

use anyhow::{bail, Context, Result};

/// Parses whitespace-separated hex bytes, e.g. `"0a 0b 0c 0d"`.
pub fn parse_hex_bytes(input: &str) -> Result<Vec<u8>> {
    input
        .split_whitespace()
        .map(|part| {
            if part.len() > 2 {
                bail!("invalid hex byte '{part}': too long");
            }
            parse_hex_byte(part)
        })
        .collect()
}

/// `from_str_radix` alone would take a leading `+`.
fn parse_hex_byte(digits: &str) -> Result<u8> {
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("invalid hex byte '{digits}'");
    }
    u8::from_str_radix(digits, 16).with_context(|| format!("invalid hex byte '{digits}'"))
}

/// Formats bytes as lowercase two-digit hex separated by single spaces.
pub fn format_hex_bytes(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Parses a contiguous hex string; embedded whitespace is ignored.
pub fn parse_hex_string(input: &str) -> Result<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    if cleaned.len() % 2 != 0 {
        bail!("hex string must have even length, got {}", cleaned.len());
    }
    (0..cleaned.len())
        .step_by(2)
        .map(|i| {
            let pair = cleaned.get(i..i + 2).context("hex string is not ASCII")?;
            parse_hex_byte(pair)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_space_separated_bytes() {
        assert_eq!(parse_hex_bytes("0a 0b 0c 0d").unwrap(), vec![0x0a, 0x0b, 0x0c, 0x0d]);
        assert_eq!(parse_hex_bytes("  1\tff\n 00 ").unwrap(), vec![0x01, 0xff, 0x00]);
        assert_eq!(parse_hex_bytes("AB cd").unwrap(), vec![0xab, 0xcd]);
    }

    #[test]
    fn empty_input_is_empty_key() {
        assert!(parse_hex_bytes("").unwrap().is_empty());
        assert!(parse_hex_bytes("   ").unwrap().is_empty());
    }

    #[test]
    fn rejects_long_or_bad_tokens() {
        let err = parse_hex_bytes("0a 123").unwrap_err();
        assert!(err.to_string().contains("too long"), "{err}");
        assert!(parse_hex_bytes("zz").is_err());
        assert!(parse_hex_bytes("0x").is_err());
        assert!(parse_hex_bytes("-1").is_err());
        assert!(parse_hex_bytes("+f").is_err());
        assert!(parse_hex_bytes("+f 0a").is_err());
        assert!(parse_hex_bytes("0a +").is_err());
    }

    #[test]
    fn formats_bytes() {
        assert_eq!(format_hex_bytes(&[]), "");
        assert_eq!(format_hex_bytes(&[0x00, 0x0f, 0xff]), "00 0f ff");
    }

    #[test]
    fn contiguous_strings() {
        assert_eq!(parse_hex_string("deadBEEF").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(parse_hex_string("de ad\nbe\tef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(parse_hex_string("abc").is_err());
        assert!(parse_hex_string("gg").is_err());
        assert!(parse_hex_string("+f").is_err());
        assert!(parse_hex_string("+f+f").is_err());
        assert!(parse_hex_string("").unwrap().is_empty());
    }
}
