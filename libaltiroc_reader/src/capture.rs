use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use super::error::CaptureError;

/// Bytes of the flags/error/channel sub-header counted inside a record's
/// declared size.
const RECORD_SUBHEADER_BYTES: u32 = 4;

/// One record of a recorded streaming capture: the payload bytes exactly as
/// the FPGA link delivered them, tagged with the channel they arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureFrame {
    pub flags: u16,
    pub error: u8,
    pub channel: u8,
    pub payload: Vec<u8>,
}

/// Sequential reader for recorded capture (.dat) files.
///
/// Records are laid out back to back: a little-endian u32 size (payload
/// length plus the 4-byte sub-header), u16 flags, u8 error, u8 channel, then
/// the payload. Frames come back in acquisition order, complete and
/// length-known, matching the transport contract the decoder relies on.
#[derive(Debug)]
pub struct CaptureFile {
    reader: BufReader<File>,
    path: PathBuf,
    total_size_bytes: u64,
    bytes_read: u64,
}

impl CaptureFile {
    pub fn new(path: &Path) -> Result<Self, CaptureError> {
        if !path.exists() {
            return Err(CaptureError::BadFilePath(path.to_path_buf()));
        }
        let file = File::open(path)?;
        let total_size_bytes = file.metadata()?.len();
        Ok(CaptureFile {
            reader: BufReader::new(file),
            path: path.to_path_buf(),
            total_size_bytes,
            bytes_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.total_size_bytes
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Read the next record.
    ///
    /// Returns `Ok(None)` once the file is exhausted; a record that runs past
    /// the end of the file is an IO error, not a silent truncation.
    pub fn get_next_frame(&mut self) -> Result<Option<CaptureFrame>, CaptureError> {
        if self.bytes_read >= self.total_size_bytes {
            return Ok(None);
        }
        let size = self.reader.read_u32::<LittleEndian>()?;
        if size < RECORD_SUBHEADER_BYTES {
            return Err(CaptureError::BadRecordSize(size));
        }
        let flags = self.reader.read_u16::<LittleEndian>()?;
        let error = self.reader.read_u8()?;
        let channel = self.reader.read_u8()?;
        let mut payload = vec![0u8; (size - RECORD_SUBHEADER_BYTES) as usize];
        self.reader.read_exact(&mut payload)?;
        self.bytes_read += 4 + size as u64;
        Ok(Some(CaptureFrame {
            flags,
            error,
            channel,
            payload,
        }))
    }
}

/// Encode records in the capture layout; shared by the tests and any tool
/// that synthesizes captures.
pub fn encode_record(channel: u8, payload: &[u8]) -> Vec<u8> {
    let size = payload.len() as u32 + RECORD_SUBHEADER_BYTES;
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // flags
    out.push(0); // error
    out.push(channel);
    out.extend_from_slice(payload);
    out
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    fn test_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("altiroc_{}_{}.dat", name, std::process::id()))
    }

    #[test]
    fn test_read_records_in_order() {
        let path = test_path("capture_order");
        let mut bytes = encode_record(0, &[1, 2, 3, 4]);
        bytes.extend(encode_record(1, &[5, 6, 7, 8, 9, 10, 11, 12]));
        std::fs::write(&path, &bytes).unwrap();

        let mut capture = CaptureFile::new(&path).unwrap();
        assert_eq!(capture.total_size_bytes(), bytes.len() as u64);
        let first = capture.get_next_frame().unwrap().unwrap();
        assert_eq!(first.channel, 0);
        assert_eq!(first.payload, vec![1, 2, 3, 4]);
        let second = capture.get_next_frame().unwrap().unwrap();
        assert_eq!(second.channel, 1);
        assert_eq!(second.payload.len(), 8);
        assert!(capture.get_next_frame().unwrap().is_none());
        assert_eq!(capture.bytes_read(), bytes.len() as u64);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_record_size() {
        let path = test_path("capture_bad_size");
        std::fs::write(&path, 2u32.to_le_bytes()).unwrap();
        let mut capture = CaptureFile::new(&path).unwrap();
        assert!(matches!(
            capture.get_next_frame(),
            Err(CaptureError::BadRecordSize(2))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let path = test_path("capture_does_not_exist");
        assert!(matches!(
            CaptureFile::new(&path),
            Err(CaptureError::BadFilePath(_))
        ));
    }
}
