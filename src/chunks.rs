//! PNG chunk stream parsing (RFC 2083): signature check, per-chunk length/type/data/CRC framing,
//! and the ordering rules that bind IHDR/PLTE/IDAT/IEND together.
//!
//! Chunks differ only in payload type, so rather than a `Box<dyn Chunk>` hierarchy, this keeps a
//! small record of `Option<T>` slots: at most one header, at most one palette, one concatenated
//! IDAT buffer, and an `end_seen` flag.

use crate::crc;
use crate::error::{PngError, Result};

pub const SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// The decoded IHDR record. Bit depth / color type validity is checked once, at parse time, so
/// every downstream component can assume a well-formed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ihdr {
    pub width: u32,
    pub height: u32,
    pub bit_depth: u8,
    pub color_type: u8,
    pub compression_method: u8,
    pub filter_method: u8,
    pub interlace_method: u8,
}

impl Ihdr {
    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() != 13 {
            return Err(PngError::BadHeaderField(format!(
                "IHDR payload must be 13 bytes, got {}",
                payload.len()
            )));
        }

        let header = Ihdr {
            width: u32::from_be_bytes(payload[0..4].try_into().unwrap()),
            height: u32::from_be_bytes(payload[4..8].try_into().unwrap()),
            bit_depth: payload[8],
            color_type: payload[9],
            compression_method: payload[10],
            filter_method: payload[11],
            interlace_method: payload[12],
        };
        header.validate()?;
        Ok(header)
    }

    fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(PngError::BadHeaderField(
                "width and height must both be positive".into(),
            ));
        }

        let allowed_depths: &[u8] = match self.color_type {
            0 => &[1, 2, 4, 8, 16],
            2 => &[8, 16],
            3 => &[1, 2, 4, 8],
            4 => &[8, 16],
            6 => &[8, 16],
            other => {
                return Err(PngError::BadHeaderField(format!(
                    "color type {other} is not one of 0, 2, 3, 4, 6"
                )))
            }
        };
        if !allowed_depths.contains(&self.bit_depth) {
            return Err(PngError::BadHeaderField(format!(
                "bit depth {} is not valid for color type {}",
                self.bit_depth, self.color_type
            )));
        }
        if self.compression_method != 0 {
            return Err(PngError::BadHeaderField("compression method must be 0".into()));
        }
        if self.filter_method != 0 {
            return Err(PngError::BadHeaderField("filter method must be 0".into()));
        }
        if self.interlace_method > 1 {
            return Err(PngError::BadHeaderField(format!(
                "interlace method {} is neither 0 (none) nor 1 (Adam7)",
                self.interlace_method
            )));
        }

        Ok(())
    }

    /// Raw stream channel count (1, 2, 3, or 4): bit 1 of `color_type` adds the two extra color
    /// samples, bit 2 adds one alpha sample.
    pub fn channels(&self) -> u32 {
        (((self.color_type & 0b010) + 1) + ((self.color_type & 0b100) >> 2)) as u32
    }

    pub fn uses_palette(&self) -> bool {
        self.color_type & 0b001 != 0
    }

    pub fn bits_per_pixel(&self) -> u32 {
        self.bit_depth as u32 * if self.uses_palette() { 1 } else { self.channels() }
    }

    /// Output channel count: palette images always expand to RGB, everything else keeps its raw
    /// stream channel count.
    pub fn output_channels(&self) -> u32 {
        if self.uses_palette() {
            3
        } else {
            self.channels()
        }
    }
}

/// An ordered list of (R, G, B) palette entries, indexed by a sample value when `color_type == 3`.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    pub entries: Vec<[u8; 3]>,
}

/// The chunk slots a decode needs: at most one header, at most one palette, one concatenated
/// IDAT payload, and whether IEND has been seen.
#[derive(Debug, Clone, Default)]
pub struct Chunks {
    pub header: Option<Ihdr>,
    pub palette: Option<Palette>,
    pub idat: Option<Vec<u8>>,
    pub end_seen: bool,
}

/// Parses a full PNG byte buffer: signature, then chunks until IEND, validating ordering and
/// per-chunk CRCs as it goes. Unknown chunk types are skipped without a CRC check, per §6.
pub fn parse(bytes: &[u8]) -> Result<Chunks> {
    if bytes.len() < SIGNATURE.len() || bytes[..SIGNATURE.len()] != SIGNATURE {
        return Err(PngError::BadSignature);
    }

    let mut pos = SIGNATURE.len();
    let mut chunks = Chunks::default();
    let mut index = 0usize;
    // An IDAT run, once closed by a non-IDAT chunk, may never resume (invariant (i)).
    let mut idat_open = false;
    let mut idat_closed = false;

    while pos < bytes.len() {
        if chunks.end_seen {
            return Err(PngError::BadChunkOrder("IEND must be the last chunk".into()));
        }
        if bytes.len() - pos < 8 {
            return Err(PngError::BadChunkOrder(
                "chunk header runs past the end of the file".into(),
            ));
        }

        let length = u32::from_be_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        let tag: [u8; 4] = bytes[pos + 4..pos + 8].try_into().unwrap();
        pos += 8;

        if bytes.len() - pos < length + 4 {
            return Err(PngError::BadChunkOrder(
                "chunk payload runs past the end of the file".into(),
            ));
        }
        let payload = &bytes[pos..pos + length];
        let stored_crc = u32::from_be_bytes(bytes[pos + length..pos + length + 4].try_into().unwrap());
        pos += length + 4;

        if index == 0 && tag != *b"IHDR" {
            return Err(PngError::BadChunkOrder("IHDR must be the first chunk".into()));
        }
        if tag != *b"IDAT" && idat_open {
            idat_open = false;
            idat_closed = true;
        }

        match &tag {
            b"IHDR" => {
                if chunks.header.is_some() {
                    return Err(PngError::BadChunkOrder("IHDR appeared more than once".into()));
                }
                verify_crc(&tag, payload, stored_crc)?;
                chunks.header = Some(Ihdr::parse(payload)?);
            }
            b"PLTE" => {
                if chunks.palette.is_some() {
                    return Err(PngError::BadChunkOrder("PLTE appeared more than once".into()));
                }
                verify_crc(&tag, payload, stored_crc)?;
                if payload.len() % 3 != 0 {
                    return Err(PngError::BadHeaderField(
                        "PLTE payload length must be a multiple of 3".into(),
                    ));
                }
                let entries: Vec<[u8; 3]> =
                    payload.chunks_exact(3).map(|e| [e[0], e[1], e[2]]).collect();
                if let Some(header) = chunks.header {
                    if header.color_type == 3 && entries.len() > (1usize << header.bit_depth) {
                        return Err(PngError::BadHeaderField(
                            "PLTE has more entries than the bit depth allows".into(),
                        ));
                    }
                }
                chunks.palette = Some(Palette { entries });
            }
            b"IDAT" => {
                if idat_closed {
                    return Err(PngError::BadChunkOrder(
                        "IDAT chunks must form one contiguous run".into(),
                    ));
                }
                if let Some(header) = chunks.header {
                    if header.color_type == 3 && chunks.palette.is_none() {
                        return Err(PngError::BadChunkOrder(
                            "PLTE must precede IDAT for indexed-color images".into(),
                        ));
                    }
                }
                verify_crc(&tag, payload, stored_crc)?;
                idat_open = true;
                chunks.idat.get_or_insert_with(Vec::new).extend_from_slice(payload);
            }
            b"IEND" => {
                verify_crc(&tag, payload, stored_crc)?;
                chunks.end_seen = true;
            }
            other => {
                log::warn!(
                    "skipping unrecognized chunk type {:?} ({} bytes, no CRC check)",
                    String::from_utf8_lossy(other),
                    length
                );
            }
        }

        index += 1;
    }

    if chunks.header.is_none() {
        return Err(PngError::BadChunkOrder("file is missing an IHDR chunk".into()));
    }
    if chunks.idat.is_none() {
        return Err(PngError::BadChunkOrder("file is missing an IDAT chunk".into()));
    }
    if !chunks.end_seen {
        return Err(PngError::BadChunkOrder("file is missing an IEND chunk".into()));
    }

    Ok(chunks)
}

fn verify_crc(tag: &[u8; 4], payload: &[u8], stored: u32) -> Result<()> {
    let computed = crc::crc(crc::crc_of(tag), payload);
    if computed != stored {
        return Err(PngError::BadCrc {
            chunk_type: String::from_utf8_lossy(tag).into_owned(),
            stored,
            computed,
        });
    }
    Ok(())
}
