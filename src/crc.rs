//! Table-driven IEEE CRC-32, matching PNG's Appendix requirements: reversed polynomial
//! `0xEDB88320`, right-shifting update, initial value and final XOR both `0xFFFFFFFF`.
//!
//! A chunk's CRC covers its 4-byte type field concatenated with its payload, so this exposes an
//! incremental `update` in addition to a one-shot `crc_of`, letting a multi-chunk IDAT run its
//! CRC alongside the append without re-scanning already-seen bytes.

use std::sync::OnceLock;

const TABLE_SIZE: usize = 256;

fn table() -> &'static [u32; TABLE_SIZE] {
    static TABLE: OnceLock<[u32; TABLE_SIZE]> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut table = [0u32; TABLE_SIZE];
        for (i, entry) in table.iter_mut().enumerate() {
            let mut c = i as u32;
            for _ in 0..8 {
                c = if c & 1 == 1 {
                    0xEDB8_8320 ^ (c >> 1)
                } else {
                    c >> 1
                };
            }
            *entry = c;
        }
        table
    })
}

/// Folds `bytes` into a running CRC. `seed` is the previous `update` result, or `0xFFFFFFFF` to
/// start a new computation; the caller is responsible for the final XOR via [`finish`].
fn update(seed: u32, bytes: &[u8]) -> u32 {
    let table = table();
    let mut c = seed;
    for &byte in bytes {
        c = table[((c ^ byte as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    c
}

/// Returns the CRC-32 of `bytes`, seeded fresh.
pub fn crc_of(bytes: &[u8]) -> u32 {
    update(0xFFFF_FFFF, bytes) ^ 0xFFFF_FFFF
}

/// Incremental update: `seed` is a previously-returned `crc`/`crc_seeded` value (already
/// XOR-finalized); folds in `bytes` and returns the new finalized CRC.
pub fn crc(seed: u32, bytes: &[u8]) -> u32 {
    update(seed ^ 0xFFFF_FFFF, bytes) ^ 0xFFFF_FFFF
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector_iend() {
        // IEND has no payload; its CRC is a well-known constant.
        assert_eq!(crc_of(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn incremental_matches_one_shot() {
        let whole = crc_of(b"IDATsomepixels");
        let partial = crc(crc_of(b"IDAT"), b"somepixels");
        assert_eq!(whole, partial);
    }

    #[test]
    fn empty_input_is_identity_on_seed() {
        assert_eq!(crc_of(b""), 0);
    }
}
