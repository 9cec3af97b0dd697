//! Fixed facts of the streaming word format and the calibration table.
//! Every word on the wire is 32 bits, little-endian.

/// Bytes per streaming word
pub const WORD_SIZE: usize = 4;
/// Words before the pixel data of an event frame (header + sequence counter)
pub const EVENT_HEADER_WORDS: usize = 2;

//Pixel data word layout, low bit to high
pub const SOF_OFFSET: u32 = 0;
pub const SOF_MASK: u32 = 0x3;
pub const HIT_OFFSET: u32 = 2;
pub const HIT_MASK: u32 = 0x1;
pub const TOA_DATA_OFFSET: u32 = 3;
pub const TOA_DATA_MASK: u32 = 0x7F;
pub const TOA_OVERFLOW_OFFSET: u32 = 10;
pub const TOA_OVERFLOW_MASK: u32 = 0x1;
pub const TOT_DATA_OFFSET: u32 = 11;
pub const TOT_DATA_MASK: u32 = 0x1FF;
pub const TOT_OVERFLOW_OFFSET: u32 = 20;
pub const TOT_OVERFLOW_MASK: u32 = 0x1;
pub const PIXEL_INDEX_OFFSET: u32 = 24;
pub const PIXEL_INDEX_MASK: u32 = 0x1F;

//Event header word layout
pub const FORMAT_VERSION_OFFSET: u32 = 0;
pub const FORMAT_VERSION_MASK: u32 = 0xFFF;
pub const PIX_READ_ITERATION_OFFSET: u32 = 12;
pub const PIX_READ_ITERATION_MASK: u32 = 0x1FF;
pub const START_PIX_OFFSET: u32 = 22;
pub const START_PIX_MASK: u32 = 0x1F;
pub const STOP_PIX_OFFSET: u32 = 27;
pub const STOP_PIX_MASK: u32 = 0x1F;

/// "No data" TOT code for the VPA chain
pub const TOT_SENTINEL_VPA: u16 = 0x1FC;
/// "No data" TOT code for the TZ chain
pub const TOT_SENTINEL_TZ: u16 = 0x1F8;

/// Number of distinct fine interpolator codes
pub const TOT_FINE_RANGE: usize = 16;
/// Entries in the fine calibration table (16 bin edges + the mean LSB)
pub const CALIB_TABLE_LEN: usize = 17;
/// Lines in a calibration file on disk (table + one padding zero)
pub const CALIB_FILE_LEN: usize = 18;
