//! # altiroc_reader
//!
//! altiroc_reader is the stream decoder and scan tooling for the ALTIROC
//! timing/amplitude readout test stand, written in Rust. It unpacks the
//! 32-bit streaming words produced by the FPGA readout into per-pixel
//! time-of-arrival (TOA) and time-over-threshold (TOT) measurements,
//! classifies them into the derived series used by the calibration math, and
//! drives delay/pulser sweeps with per-step statistics.
//!
//! The decoder consumes complete byte buffers delivered by a transport
//! (a recorded capture file, or a live link owned by the caller); it never
//! talks to hardware itself. Device control during a sweep sits behind the
//! [`sweep::SweepDevice`] trait.
//!
//! ## Stream format
//!
//! All words are little-endian 32-bit; a buffer must be a multiple of 4
//! bytes or it is rejected outright.
//!
//! A pixel data word packs, low to high:
//!
//! ```text
//! bits  0..2   Sof
//! bit   2      Hit
//! bits  3..10  ToaData (7 bits)
//! bit   10     ToaOverflow
//! bits  11..20 TotData (9 bits)
//! bit   20     TotOverflow
//! bits  24..29 PixelIndex (5 bits)
//! ```
//!
//! A multi-pixel event frame is a header word (FormatVersion 12 bits,
//! PixReadIteration 9 bits, StartPix 5 bits, StopPix 5 bits), a raw 32-bit
//! sequence counter, then `(StopPix - StartPix + 1) * (PixReadIteration + 1)`
//! pixel data words. A single-word event reuses the PixelIndex bit range for
//! a sequence count; which reading applies is a protocol convention the
//! caller states explicitly via [`frame::IndexField`].
//!
//! ## Derived series
//!
//! Each accepted hit is classified independently into up to three series:
//! TOA (hit set, no TOA overflow), and the TOT fine/coarse/interpolated
//! decompositions of the VPA and TZ processing chains (hit set, TOT code not
//! equal to the chain's "no data" sentinel, `0x1FC` and `0x1F8`
//! respectively). See [`accumulator`].
//!
//! ## Calibration
//!
//! The TOT fine interpolator is linearized against a 17-entry table built by
//! histogramming fine codes over a large sample ([`calibration`]). Tables
//! are stored as flat text files, one float per line, and must round-trip
//! exactly so runs stay comparable across sessions.
//!
//! ## Configuration
//!
//! Scan settings are YAML, compatible between the library and the CLI:
//!
//! ```yml
//! pixel_number: 4
//! dac_vth: 320
//! qinj: 13
//! tot_mode: vpa
//! lsb_totc_ps: 160.0
//! delay_step_ps: 9.5582
//! iterations_per_step: 16
//! sweep_start: 0
//! sweep_stop: 20
//! sweep_step: 1
//! step_timeout_ms: 1000
//! calibration_path: TestData/TOT_fine_calibration.txt
//! ```
//!
//! ## CLI
//!
//! The `altiroc_reader_cli` binary works on recorded captures: `dump` logs
//! every decoded event, `convert` exports per-hit text files per FPGA
//! channel, `calibrate` builds and saves the fine-interpolator table, and
//! `analyze` produces the per-step TOT summary for a sweep recorded as one
//! capture per step.
pub mod accumulator;
pub mod calibration;
pub mod capture;
pub mod config;
pub mod constants;
pub mod error;
pub mod frame;
pub mod process;
pub mod stats;
pub mod sweep;
pub mod worker_status;
