//! zlib-wrapped DEFLATE decompression (RFC 1950 / RFC 1951): the codec that turns a PNG's
//! concatenated IDAT stream into raw, still-filtered scanline bytes.

use crate::bitreader::{BitReader, Order};
use crate::error::{PngError, Result};
use crate::huffman::{fixed_distance_table, fixed_literal_length_table, HuffmanTable};

const CM_FILTER: u8 = 0x0F;
const CM_DEFLATE: u8 = 0x08;
const CINFO_OFFSET: u8 = 4;
const FDICT_FILTER: u8 = 0x20;

const LENGTH_TABLE: [(u16, u8); 29] = [
    (3, 0),
    (4, 0),
    (5, 0),
    (6, 0),
    (7, 0),
    (8, 0),
    (9, 0),
    (10, 0),
    (11, 1),
    (13, 1),
    (15, 1),
    (17, 1),
    (19, 2),
    (23, 2),
    (27, 2),
    (31, 2),
    (35, 3),
    (43, 3),
    (51, 3),
    (59, 3),
    (67, 4),
    (83, 4),
    (99, 4),
    (115, 4),
    (131, 5),
    (163, 5),
    (195, 5),
    (227, 5),
    (258, 0),
];

const DISTANCE_TABLE: [(u16, u8); 30] = [
    (1, 0),
    (2, 0),
    (3, 0),
    (4, 0),
    (5, 1),
    (7, 1),
    (9, 2),
    (13, 2),
    (17, 3),
    (25, 3),
    (33, 4),
    (49, 4),
    (65, 5),
    (97, 5),
    (129, 6),
    (193, 6),
    (257, 7),
    (385, 7),
    (513, 8),
    (769, 8),
    (1025, 9),
    (1537, 9),
    (2049, 10),
    (3073, 10),
    (4097, 11),
    (6145, 11),
    (8193, 12),
    (12289, 12),
    (16385, 13),
    (24577, 13),
];

const HCLEN_SWIZZLE: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Decompresses a zlib-wrapped DEFLATE stream, as used for a PNG's reassembled IDAT payload.
pub fn inflate(input: &[u8]) -> Result<Vec<u8>> {
    let mut zlib = BitReader::new(input, Order::Big);

    let cmf = zlib.consume(8, Order::Big)? as u8;
    if cmf & CM_FILTER != CM_DEFLATE {
        return Err(PngError::BadZlibHeader("compression method must be 8 (deflate)".into()));
    }
    let cinfo = cmf >> CINFO_OFFSET;
    if cinfo > 7 {
        return Err(PngError::BadZlibHeader("CINFO window size exponent exceeds 7".into()));
    }
    let window = 1usize << (cinfo + 8);

    let flg = zlib.consume(8, Order::Big)? as u8;
    let check = (cmf as u16) * 256 + flg as u16;
    if check % 31 != 0 {
        return Err(PngError::BadZlibHeader("FCHECK bits do not satisfy the header checksum".into()));
    }
    if flg & FDICT_FILTER != 0 {
        return Err(PngError::BadZlibHeader("preset dictionaries are not supported".into()));
    }

    let mut reader = zlib.with_byte_order(Order::Little);
    let mut output = Vec::new();

    loop {
        let is_final = reader.consume(1, Order::Little)? != 0;
        let btype = reader.consume(2, Order::Little)?;

        match btype {
            0b00 => inflate_stored(&mut reader, &mut output)?,
            0b01 => {
                let lit_len = fixed_literal_length_table()?;
                let dist = fixed_distance_table()?;
                inflate_block(&mut reader, &lit_len, &dist, window, &mut output)?;
            }
            0b10 => {
                let (lit_len, dist) = read_dynamic_tables(&mut reader)?;
                inflate_block(&mut reader, &lit_len, &dist, window, &mut output)?;
            }
            _ => return Err(PngError::BadDeflate("block type 3 is reserved and invalid".into())),
        }

        if is_final {
            break;
        }
    }

    Ok(output)
}

fn inflate_stored(reader: &mut BitReader, output: &mut Vec<u8>) -> Result<()> {
    reader.flush_byte();
    let len = reader.consume(16, Order::Little)? as u16;
    let nlen = reader.consume(16, Order::Little)? as u16;
    if len ^ 0xFFFF != nlen {
        return Err(PngError::BadDeflate("stored block LEN/NLEN mismatch".into()));
    }
    for _ in 0..len {
        output.push(reader.consume(8, Order::Little)? as u8);
    }
    Ok(())
}

fn read_dynamic_tables(reader: &mut BitReader) -> Result<(HuffmanTable, HuffmanTable)> {
    let hlit = reader.consume(5, Order::Little)? as usize + 257;
    let hdist = reader.consume(5, Order::Little)? as usize + 1;
    let hclen = reader.consume(4, Order::Little)? as usize + 4;

    let mut hclen_lengths = [0u8; 19];
    for i in 0..hclen {
        hclen_lengths[HCLEN_SWIZZLE[i]] = reader.consume(3, Order::Little)? as u8;
    }
    let code_length_table = HuffmanTable::new(7, &hclen_lengths)?;

    let total = hlit + hdist;
    let mut lengths = vec![0u8; total];
    let mut i = 0;
    while i < total {
        let symbol = code_length_table.decode(reader)?;
        let (repeated, repetitions) = match symbol {
            0..=15 => (symbol as u8, 1u32),
            16 => {
                if i == 0 {
                    return Err(PngError::BadDeflate(
                        "repeat-previous code length encountered with nothing to repeat".into(),
                    ));
                }
                let extra = reader.consume(2, Order::Little)? as u32 + 3;
                (lengths[i - 1], extra)
            }
            17 => (0, reader.consume(3, Order::Little)? as u32 + 3),
            18 => (0, reader.consume(7, Order::Little)? as u32 + 11),
            _ => {
                return Err(PngError::BadDeflate(format!(
                    "code-length alphabet has no symbol {symbol}"
                )))
            }
        };
        for _ in 0..repetitions {
            if i >= total {
                return Err(PngError::BadDeflate(
                    "code length repeat run overruns HLIT+HDIST".into(),
                ));
            }
            lengths[i] = repeated;
            i += 1;
        }
    }

    let lit_len = HuffmanTable::new(15, &lengths[..hlit])?;
    let dist = HuffmanTable::new(15, &lengths[hlit..])?;
    Ok((lit_len, dist))
}

fn inflate_block(
    reader: &mut BitReader,
    lit_len: &HuffmanTable,
    dist: &HuffmanTable,
    window: usize,
    output: &mut Vec<u8>,
) -> Result<()> {
    loop {
        let symbol = lit_len.decode(reader)?;
        if symbol < 256 {
            output.push(symbol as u8);
            continue;
        }
        if symbol == 256 {
            return Ok(());
        }

        let len_index = (symbol - 257) as usize;
        if len_index >= LENGTH_TABLE.len() {
            return Err(PngError::BadDeflate(format!("length symbol {symbol} out of range")));
        }
        let (base_length, extra_length_bits) = LENGTH_TABLE[len_index];
        let length =
            base_length as u32 + reader.consume(extra_length_bits as u32, Order::Little)? as u32;

        let dist_index = dist.decode(reader)? as usize;
        if dist_index >= DISTANCE_TABLE.len() {
            return Err(PngError::BadDeflate(format!("distance symbol {dist_index} out of range")));
        }
        let (base_distance, extra_distance_bits) = DISTANCE_TABLE[dist_index];
        let distance = base_distance as usize
            + reader.consume(extra_distance_bits as u32, Order::Little)? as usize;

        if distance > output.len() {
            return Err(PngError::BadDeflate(
                "back-reference distance exceeds decoded output so far".into(),
            ));
        }
        if distance > window {
            return Err(PngError::BadDeflate(
                "back-reference distance exceeds the declared window size".into(),
            ));
        }

        let start = output.len() - distance;
        for i in 0..length as usize {
            let byte = output[start + i];
            output.push(byte);
        }
    }
}
