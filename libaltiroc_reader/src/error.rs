use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;
use super::worker_status::TaskStatus;

/// Errors produced when decoding raw byte buffers into streaming words,
/// pixel hits, or event frames. Malformed input is rejected up front; the
/// decoder never partially decodes and never reads past the buffer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Buffer of {0} bytes is not a multiple of the {size}-byte word size", size=WORD_SIZE)]
    Misaligned(usize),
    #[error("Single-word decode requires exactly {size} bytes, got {0}", size=WORD_SIZE)]
    NotSingleWord(usize),
    #[error("Buffer of {0} bytes is too short for an event frame header ({words} words)", words=EVENT_HEADER_WORDS)]
    MissingHeader(usize),
    #[error("Invalid pixel range in event header; StartPix {0} exceeds StopPix {1}")]
    BadPixelRange(u8, u8),
    #[error("Event frame truncated; header declares {declared} pixel words but only {available} are present")]
    Truncated { declared: usize, available: usize },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Could not open capture because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Capture record declares size {0} which is smaller than its sub-header")]
    BadRecordSize(u32),
    #[error("Capture failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Capture payload failed to decode: {0}")]
    BadFrame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Could not load calibration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Calibration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Calibration file contains a value that is not a float: {0}")]
    ParsingError(#[from] std::num::ParseFloatError),
    #[error("Calibration file holds {0} values; expected {lo} or {hi}", lo=CALIB_TABLE_LEN, hi=CALIB_FILE_LEN)]
    BadEntryCount(usize),
    #[error("Cannot build calibration table from an empty fine-code sample")]
    EmptySample,
}

/// Opaque failure from the device-control collaborator behind [`crate::sweep::SweepDevice`].
#[derive(Debug, Error)]
#[error("Device control failed: {0}")]
pub struct DeviceError(pub String);

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Sweep failed due to device error: {0}")]
    DeviceError(#[from] DeviceError),
    #[error("Sweep step {step} timed out with {collected} of {target} hits collected")]
    Timeout {
        step: u32,
        collected: usize,
        target: usize,
    },
    #[error("Sweep collected no hits across all steps")]
    NoData,
    #[error("Accumulator lock was poisoned by a panicked writer")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor failed due to Capture error: {0}")]
    CaptureError(#[from] CaptureError),
    #[error("Processor failed due to Frame error: {0}")]
    FrameError(#[from] FrameError),
    #[error("Processor failed due to Calibration error: {0}")]
    CalibrationError(#[from] CalibrationError),
    #[error("Processor failed due to Sweep error: {0}")]
    SweepError(#[from] SweepError),
    #[error("Processor failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Processor failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<TaskStatus>),
    #[error("Processor failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
