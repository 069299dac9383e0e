//! Canonical Huffman decoding, exploded into a flat lookup table at construction time.
//!
//! DEFLATE never stores an explicit code, only a per-symbol code *length*; the codes themselves
//! follow deterministically from the canonical assignment rule (RFC 1951 §3.2.2). Rather than
//! walking a bit at a time down a tree, [`HuffmanTable::new`] assigns every symbol its canonical
//! code and then fans each code out across all `maxBits`-wide suffixes it's a prefix of, so
//! [`HuffmanTable::decode`] is a single `maxBits`-wide peek, a table index, and a discard.

use crate::bitreader::{BitReader, Order};
use crate::error::{PngError, Result};

#[derive(Clone, Copy, Default)]
struct Entry {
    symbol: u16,
    bits_used: u8,
}

pub struct HuffmanTable {
    max_bits: u32,
    entries: Vec<Entry>,
}

impl HuffmanTable {
    /// Builds a canonical Huffman table from a per-symbol code-length slice. `code_lengths[s] ==
    /// 0` means symbol `s` does not occur. `max_bits` bounds every length in `code_lengths` and
    /// sizes the exploded table (`1 << max_bits` entries).
    pub fn new(max_bits: u32, code_lengths: &[u8]) -> Result<Self> {
        let mut histogram = vec![0u32; max_bits as usize + 1];
        for &len in code_lengths {
            if len as u32 > max_bits {
                return Err(PngError::BadDeflate(format!(
                    "huffman code length {len} exceeds max {max_bits}"
                )));
            }
            if len > 0 {
                histogram[len as usize] += 1;
            }
        }

        let mut next_code = vec![0u32; max_bits as usize + 1];
        for len in 1..=max_bits as usize {
            next_code[len] = (next_code[len - 1] + histogram[len - 1]) << 1;
        }

        let mut entries = vec![Entry::default(); 1usize << max_bits];
        for (symbol, &len) in code_lengths.iter().enumerate() {
            if len == 0 {
                continue;
            }
            let len = len as u32;
            let code = next_code[len as usize];
            next_code[len as usize] += 1;
            if code >= (1u32 << len) {
                return Err(PngError::BadDeflate(
                    "huffman code lengths do not form a valid canonical code".into(),
                ));
            }

            let postpend_bits = max_bits - len;
            for postpend in 0..(1u32 << postpend_bits) {
                let index = ((code << postpend_bits) | postpend) as usize;
                entries[index] = Entry {
                    symbol: symbol as u16,
                    bits_used: len as u8,
                };
            }
        }

        Ok(HuffmanTable { max_bits, entries })
    }

    /// A degenerate canonical table where every symbol has the same code length, used for
    /// DEFLATE's fixed-Huffman distance alphabet (30 symbols, all 5 bits wide).
    pub fn fixed_width(symbol_count: usize, width: u8) -> Result<Self> {
        Self::new(width as u32, &vec![width; symbol_count])
    }

    /// Decodes one symbol: peeks `max_bits` MSB-first, looks up the table, discards the code's
    /// actual width.
    pub fn decode(&self, reader: &mut BitReader) -> Result<u16> {
        let index = reader.peek(self.max_bits, Order::Big)? as usize;
        let entry = self.entries[index];
        if entry.bits_used == 0 {
            return Err(PngError::BadDeflate(
                "huffman table has no code for the peeked bit pattern".into(),
            ));
        }
        reader.discard(entry.bits_used as u32);
        Ok(entry.symbol)
    }
}

/// RFC 1951's fixed literal/length code lengths: 8 for 0-143, 9 for 144-255, 7 for 256-279,
/// 8 for 280-287.
pub fn fixed_literal_length_table() -> Result<HuffmanTable> {
    let mut lengths = [0u8; 288];
    lengths[0..144].fill(8);
    lengths[144..256].fill(9);
    lengths[256..280].fill(7);
    lengths[280..288].fill(8);
    HuffmanTable::new(9, &lengths)
}

/// RFC 1951's fixed distance code: 30 symbols, all 5 bits wide.
pub fn fixed_distance_table() -> Result<HuffmanTable> {
    HuffmanTable::fixed_width(30, 5)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_buffer(bits: &[(u32, u32)]) -> Vec<u8> {
        // Packs (value, width) pairs MSB-first into bytes, matching how Huffman codes are
        // written on the wire.
        let mut acc: u64 = 0;
        let mut acc_bits = 0u32;
        let mut out = Vec::new();
        for &(value, width) in bits {
            acc = (acc << width) | (value as u64);
            acc_bits += width;
            while acc_bits >= 8 {
                let shift = acc_bits - 8;
                out.push(((acc >> shift) & 0xFF) as u8);
                acc_bits -= 8;
            }
        }
        if acc_bits > 0 {
            out.push(((acc << (8 - acc_bits)) & 0xFF) as u8);
        }
        out
    }

    #[test]
    fn three_symbol_canonical_code() {
        // Symbol 0: length 1, symbol 1: length 2, symbol 2: length 2. Canonical codes (MSB
        // first): 0 -> 0, 1 -> 10, 2 -> 11.
        let table = HuffmanTable::new(2, &[1, 2, 2]).unwrap();
        let buf = build_buffer(&[(0b0, 1), (0b10, 2), (0b11, 2)]);
        let mut reader = BitReader::new(&buf, Order::Big);

        assert_eq!(table.decode(&mut reader).unwrap(), 0);
        assert_eq!(table.decode(&mut reader).unwrap(), 1);
        assert_eq!(table.decode(&mut reader).unwrap(), 2);
    }

    #[test]
    fn absent_symbols_have_zero_length() {
        let table = HuffmanTable::new(2, &[0, 1, 1]).unwrap();
        let buf = build_buffer(&[(0b0, 1)]);
        let mut reader = BitReader::new(&buf, Order::Big);
        assert_eq!(table.decode(&mut reader).unwrap(), 1);
    }

    #[test]
    fn over_length_code_is_rejected() {
        let err = HuffmanTable::new(2, &[3]).unwrap_err();
        assert!(matches!(err, PngError::BadDeflate(_)));
    }

    #[test]
    fn non_canonical_lengths_overflow_and_are_rejected() {
        // Three symbols all claiming length 1 cannot form a canonical code (only two length-1
        // codes exist: 0 and 1).
        let err = HuffmanTable::new(2, &[1, 1, 1]).unwrap_err();
        assert!(matches!(err, PngError::BadDeflate(_)));
    }

    #[test]
    fn fixed_tables_build_without_error() {
        let lit = fixed_literal_length_table().unwrap();
        let dist = fixed_distance_table().unwrap();
        assert_eq!(lit.max_bits, 9);
        assert_eq!(dist.max_bits, 5);
    }

    /// Computes the canonical code for every symbol the same way `HuffmanTable::new` does, so a
    /// test can encode with the codes the table is expected to have assigned internally.
    fn canonical_codes(max_bits: u32, code_lengths: &[u8]) -> Vec<Option<(u32, u32)>> {
        let mut histogram = vec![0u32; max_bits as usize + 1];
        for &len in code_lengths {
            if len > 0 {
                histogram[len as usize] += 1;
            }
        }
        let mut next_code = vec![0u32; max_bits as usize + 1];
        for len in 1..=max_bits as usize {
            next_code[len] = (next_code[len - 1] + histogram[len - 1]) << 1;
        }
        code_lengths
            .iter()
            .map(|&len| {
                if len == 0 {
                    return None;
                }
                let code = next_code[len as usize];
                next_code[len as usize] += 1;
                Some((code, len as u32))
            })
            .collect()
    }

    proptest::proptest! {
        // A canonical table built from any length assignment that doesn't overflow its own code
        // space must decode every symbol it was given a code for back to that symbol.
        #[test]
        fn canonical_round_trip(max_bits in 1u32..5, counts in proptest::collection::vec(0u8..4, 1..8)) {
            let lengths: Vec<u8> = counts
                .iter()
                .map(|&c| 1 + (c as u32 % max_bits) as u8)
                .collect();

            let table = match HuffmanTable::new(max_bits, &lengths) {
                Ok(table) => table,
                Err(_) => return Ok(()),
            };
            let codes = canonical_codes(max_bits, &lengths);

            let bits: Vec<(u32, u32)> = codes.iter().filter_map(|c| *c).collect();
            let buf = build_buffer(&bits);
            let mut reader = BitReader::new(&buf, Order::Big);
            for (symbol, code) in codes.iter().enumerate() {
                if code.is_some() {
                    prop_assert_eq!(table.decode(&mut reader).unwrap(), symbol as u16);
                }
            }
        }
    }
}
