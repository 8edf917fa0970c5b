//! MAME trace (.tr) reader.
//!
//! Trace lines begin with a four-hex-digit address and a colon; every such
//! prefix becomes an entry address. The result is deduplicated and sorted
//! ascending.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;

pub fn parse_trace(text: &str) -> Vec<u16> {
    let mut addresses = BTreeSet::new();
    for line in text.lines() {
        let bytes = line.as_bytes();
        if bytes.len() < 5 || bytes[4] != b':' {
            continue;
        }
        if !bytes[..4].iter().all(|b| b.is_ascii_hexdigit()) {
            continue;
        }
        if let Ok(addr) = u16::from_str_radix(&line[..4], 16) {
            addresses.insert(addr);
        }
    }
    addresses.into_iter().collect()
}

pub fn read_trace<P: AsRef<Path>>(path: P) -> io::Result<Vec<u16>> {
    let text = fs::read_to_string(path)?;
    Ok(parse_trace(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_address_prefixes() {
        let text = "0100: ld a,5\n0102: ret\n0100: ld a,5\n";
        assert_eq!(parse_trace(text), vec![0x0100, 0x0102]);
    }

    #[test]
    fn test_skips_lines_without_prefix() {
        let text = "MAME trace\n01xx: nope\n0100 no colon\nABCD: fine\n";
        assert_eq!(parse_trace(text), vec![0xabcd]);
    }

    #[test]
    fn test_result_is_sorted_ascending() {
        let text = "ff00: a\n0038: b\n0100: c\n";
        assert_eq!(parse_trace(text), vec![0x0038, 0x0100, 0xff00]);
    }
}
