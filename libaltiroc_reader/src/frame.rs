use byteorder::{ByteOrder, LittleEndian};

use super::constants::*;
use super::error::FrameError;

/// The decoded fields of one 32-bit pixel data word.
///
/// All fields are the raw unsigned codes as they sit on the wire; no scaling
/// or calibration is applied here. A PixelHit is immutable once decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelHit {
    pub pixel_index: u8,
    pub tot_overflow: u8,
    pub tot_data: u16,
    pub toa_overflow: u8,
    pub toa_data: u8,
    pub hit: u8,
    pub sof: u8,
}

impl PixelHit {
    /// Decode a pixel data word. Pure shift-and-mask, no sign extension.
    pub fn from_word(word: u32) -> Self {
        PixelHit {
            pixel_index: ((word >> PIXEL_INDEX_OFFSET) & PIXEL_INDEX_MASK) as u8,
            tot_overflow: ((word >> TOT_OVERFLOW_OFFSET) & TOT_OVERFLOW_MASK) as u8,
            tot_data: ((word >> TOT_DATA_OFFSET) & TOT_DATA_MASK) as u16,
            toa_overflow: ((word >> TOA_OVERFLOW_OFFSET) & TOA_OVERFLOW_MASK) as u8,
            toa_data: ((word >> TOA_DATA_OFFSET) & TOA_DATA_MASK) as u8,
            hit: ((word >> HIT_OFFSET) & HIT_MASK) as u8,
            sof: ((word >> SOF_OFFSET) & SOF_MASK) as u8,
        }
    }

    /// Pack the fields back into a word. Inverse of [`PixelHit::from_word`]
    /// for all in-range field values; used to synthesize test data.
    pub fn to_word(&self) -> u32 {
        ((self.pixel_index as u32 & PIXEL_INDEX_MASK) << PIXEL_INDEX_OFFSET)
            | ((self.tot_overflow as u32 & TOT_OVERFLOW_MASK) << TOT_OVERFLOW_OFFSET)
            | ((self.tot_data as u32 & TOT_DATA_MASK) << TOT_DATA_OFFSET)
            | ((self.toa_overflow as u32 & TOA_OVERFLOW_MASK) << TOA_OVERFLOW_OFFSET)
            | ((self.toa_data as u32 & TOA_DATA_MASK) << TOA_DATA_OFFSET)
            | ((self.hit as u32 & HIT_MASK) << HIT_OFFSET)
            | ((self.sof as u32 & SOF_MASK) << SOF_OFFSET)
    }

    pub fn is_hit(&self) -> bool {
        self.hit != 0
    }

    /// A TOA measurement is usable only when the hit flag is set and the TOA
    /// counter did not overflow.
    pub fn toa_valid(&self) -> bool {
        self.is_hit() && self.toa_overflow == 0
    }
}

/// Header word of a multi-pixel event frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    pub format_version: u16,
    pub pix_read_iteration: u16,
    pub start_pix: u8,
    pub stop_pix: u8,
}

impl EventHeader {
    /// Decode the header word, rejecting an inverted pixel range. A header
    /// with StopPix < StartPix would declare a negative pixel count and is
    /// malformed, never a zero-hit frame.
    pub fn from_word(word: u32) -> Result<Self, FrameError> {
        let header = EventHeader {
            format_version: ((word >> FORMAT_VERSION_OFFSET) & FORMAT_VERSION_MASK) as u16,
            pix_read_iteration: ((word >> PIX_READ_ITERATION_OFFSET) & PIX_READ_ITERATION_MASK)
                as u16,
            start_pix: ((word >> START_PIX_OFFSET) & START_PIX_MASK) as u8,
            stop_pix: ((word >> STOP_PIX_OFFSET) & STOP_PIX_MASK) as u8,
        };
        if header.stop_pix < header.start_pix {
            return Err(FrameError::BadPixelRange(header.start_pix, header.stop_pix));
        }
        Ok(header)
    }

    /// Pack the header fields back into a word; used to synthesize test data.
    pub fn to_word(&self) -> u32 {
        ((self.format_version as u32 & FORMAT_VERSION_MASK) << FORMAT_VERSION_OFFSET)
            | ((self.pix_read_iteration as u32 & PIX_READ_ITERATION_MASK)
                << PIX_READ_ITERATION_OFFSET)
            | ((self.start_pix as u32 & START_PIX_MASK) << START_PIX_OFFSET)
            | ((self.stop_pix as u32 & STOP_PIX_MASK) << STOP_PIX_OFFSET)
    }

    /// Number of pixel data words the header declares:
    /// `(StopPix - StartPix + 1) * (PixReadIteration + 1)`.
    pub fn num_pix_values(&self) -> usize {
        (self.stop_pix as usize - self.start_pix as usize + 1)
            * (self.pix_read_iteration as usize + 1)
    }
}

/// A fully decoded multi-pixel event frame: header, sequence counter, and the
/// ordered pixel hits declared by the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventFrame {
    pub header: EventHeader,
    pub seq_cnt: u32,
    pub hits: Vec<PixelHit>,
}

impl EventFrame {
    /// Decode a complete event frame from a raw byte buffer.
    ///
    /// Word 0 is the header, word 1 the sequence counter, and the following
    /// `num_pix_values` words are pixel data. The declared pixel count is
    /// checked against the buffer before any pixel word is read.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        let words = to_words(buf)?;
        if words.len() < EVENT_HEADER_WORDS {
            return Err(FrameError::MissingHeader(buf.len()));
        }
        let header = EventHeader::from_word(words[0])?;
        let seq_cnt = words[1];
        let declared = header.num_pix_values();
        let available = words.len() - EVENT_HEADER_WORDS;
        if declared > available {
            return Err(FrameError::Truncated {
                declared,
                available,
            });
        }
        let hits = words[EVENT_HEADER_WORDS..EVENT_HEADER_WORDS + declared]
            .iter()
            .map(|w| PixelHit::from_word(*w))
            .collect();
        Ok(EventFrame {
            header,
            seq_cnt,
            hits,
        })
    }
}

/// Interpretation of the high five bits of a bare (headerless) data word.
///
/// The wire format reuses the same bit range for the pixel index of a
/// multi-pixel frame and the sequence count of a single-word event. Buffer
/// length alone cannot distinguish the two, so the caller selects the
/// interpretation its upstream protocol speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
    PixelIndex,
    SeqCount,
}

/// A single-word event: one pixel data word with no surrounding frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleWordEvent {
    pub hit: PixelHit,
    pub index_field: IndexField,
}

impl SingleWordEvent {
    /// Decode a single-word event from a buffer of exactly 4 bytes.
    pub fn from_bytes(buf: &[u8], index_field: IndexField) -> Result<Self, FrameError> {
        if buf.len() != WORD_SIZE {
            return Err(FrameError::NotSingleWord(buf.len()));
        }
        Ok(SingleWordEvent {
            hit: PixelHit::from_word(LittleEndian::read_u32(buf)),
            index_field,
        })
    }

    /// The high bits read as a sequence count, when decoded in that mode.
    pub fn seq_cnt(&self) -> Option<u8> {
        match self.index_field {
            IndexField::SeqCount => Some(self.hit.pixel_index),
            IndexField::PixelIndex => None,
        }
    }

    /// The high bits read as a pixel index, when decoded in that mode.
    pub fn pixel_index(&self) -> Option<u8> {
        match self.index_field {
            IndexField::PixelIndex => Some(self.hit.pixel_index),
            IndexField::SeqCount => None,
        }
    }
}

/// Reinterpret a byte buffer as little-endian 32-bit words, rejecting
/// buffers that are not word aligned.
pub fn to_words(buf: &[u8]) -> Result<Vec<u32>, FrameError> {
    if buf.len() % WORD_SIZE != 0 {
        return Err(FrameError::Misaligned(buf.len()));
    }
    Ok(buf
        .chunks_exact(WORD_SIZE)
        .map(LittleEndian::read_u32)
        .collect())
}

/// Decode every word of a word-aligned buffer as a pixel data word.
///
/// This is the streaming path: captures deliver buffers of back-to-back hit
/// words with no header. An empty buffer decodes to zero hits, which is a
/// distinct outcome from any malformed-frame error.
pub fn decode_hit_words(buf: &[u8]) -> Result<Vec<PixelHit>, FrameError> {
    Ok(to_words(buf)?
        .into_iter()
        .map(PixelHit::from_word)
        .collect())
}
