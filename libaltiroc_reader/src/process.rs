use fxhash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;

use super::accumulator::{HitAccumulator, TotMode};
use super::calibration::TotFineCalibration;
use super::capture::CaptureFile;
use super::config::Config;
use super::constants::WORD_SIZE;
use super::error::{ProcessorError, SweepError};
use super::frame::{EventFrame, IndexField, SingleWordEvent};
use super::sweep::{SweepData, SweepStep, TotSweepSummary};
use super::worker_status::{BarColor, TaskStatus};

/// Progress updates are sent whenever at least this fraction of the capture
/// has been consumed since the last update.
const FLUSH_FRAC: f32 = 0.01;

/// Tracks how much of a capture has been read and throttles status messages.
struct Progress<'a> {
    tx: &'a Sender<TaskStatus>,
    file_index: usize,
    total: u64,
    last_sent: f32,
}

impl<'a> Progress<'a> {
    fn start(
        tx: &'a Sender<TaskStatus>,
        file_index: usize,
        total: u64,
    ) -> Result<Self, ProcessorError> {
        tx.send(TaskStatus::new(0.0, file_index, BarColor::CYAN))?;
        Ok(Self {
            tx,
            file_index,
            total,
            last_sent: 0.0,
        })
    }

    fn update(&mut self, bytes_read: u64) -> Result<(), ProcessorError> {
        if self.total == 0 {
            return Ok(());
        }
        let progress = bytes_read as f32 / self.total as f32;
        if progress - self.last_sent >= FLUSH_FRAC {
            self.last_sent = progress;
            self.tx
                .send(TaskStatus::new(progress, self.file_index, BarColor::CYAN))?;
        }
        Ok(())
    }

    fn finish(self) -> Result<(), ProcessorError> {
        self.tx
            .send(TaskStatus::new(1.0, self.file_index, BarColor::GREEN))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct DumpSummary {
    pub records: usize,
    pub single_word_events: usize,
    pub event_frames: usize,
    pub pixel_hits: usize,
    pub malformed: usize,
}

/// Decode a capture record by record and log every event, in the style of a
/// terminal file dump. Single-word records carry a sequence count in the high
/// bits by the recording convention; anything larger is a full event frame.
///
/// Malformed records are logged and counted, never silently dropped, and the
/// dump carries on so one bad frame does not hide the rest of the file.
pub fn dump_capture(
    path: &Path,
    tx: &Sender<TaskStatus>,
    file_index: usize,
) -> Result<DumpSummary, ProcessorError> {
    let mut capture = CaptureFile::new(path)?;
    log::info!(
        "Dumping capture {} ({})",
        path.to_string_lossy(),
        human_bytes::human_bytes(capture.total_size_bytes() as f64)
    );
    let mut progress = Progress::start(tx, file_index, capture.total_size_bytes())?;
    let mut summary = DumpSummary::default();

    while let Some(record) = capture.get_next_frame()? {
        summary.records += 1;
        if record.payload.len() == WORD_SIZE {
            match SingleWordEvent::from_bytes(&record.payload, IndexField::SeqCount) {
                Ok(event) => {
                    summary.single_word_events += 1;
                    let hit = event.hit;
                    log::info!(
                        "Event[SeqCnt={:#x}]: (TotOverflow = {}, TotData = {:#x}), (ToaOverflow = {}, ToaData = {:#x}), Hit = {}",
                        event.seq_cnt().unwrap_or(0),
                        hit.tot_overflow,
                        hit.tot_data,
                        hit.toa_overflow,
                        hit.toa_data,
                        hit.hit,
                    );
                }
                Err(e) => {
                    summary.malformed += 1;
                    log::error!("Skipping malformed record: {e}");
                }
            }
        } else {
            match EventFrame::from_bytes(&record.payload) {
                Ok(frame) => {
                    summary.event_frames += 1;
                    summary.pixel_hits += frame.hits.len();
                    log::info!(
                        "EventFrame[SeqCnt={}]: FormatVersion = {}, PixReadIteration = {}, StartPix = {}, StopPix = {}, {} pixel hits",
                        frame.seq_cnt,
                        frame.header.format_version,
                        frame.header.pix_read_iteration,
                        frame.header.start_pix,
                        frame.header.stop_pix,
                        frame.hits.len(),
                    );
                    for hit in &frame.hits {
                        log::info!(
                            "  pixValue[{}]: TotOverflow = {}, TotData = {:#x}, ToaOverflow = {}, ToaData = {:#x}, Hit = {}, Sof = {}",
                            hit.pixel_index,
                            hit.tot_overflow,
                            hit.tot_data,
                            hit.toa_overflow,
                            hit.toa_data,
                            hit.hit,
                            hit.sof,
                        );
                    }
                }
                Err(e) => {
                    summary.malformed += 1;
                    log::error!("Skipping malformed record: {e}");
                }
            }
        }
        progress.update(capture.bytes_read())?;
    }

    progress.finish()?;
    Ok(summary)
}

/// Convert a capture of multi-pixel event frames into per-channel text files,
/// one line per hit (`pixel toa totc totf toa_overflow tot_overflow`),
/// grouped by the FPGA channel the record arrived on.
///
/// Returns the paths written. An existing output file is never overwritten;
/// a timestamp suffix is appended instead.
pub fn convert_capture(
    path: &Path,
    mode: TotMode,
    tx: &Sender<TaskStatus>,
    file_index: usize,
) -> Result<Vec<PathBuf>, ProcessorError> {
    let mut capture = CaptureFile::new(path)?;
    log::info!(
        "Converting capture {} ({})",
        path.to_string_lossy(),
        human_bytes::human_bytes(capture.total_size_bytes() as f64)
    );
    let mut progress = Progress::start(tx, file_index, capture.total_size_bytes())?;

    let mut outputs: FxHashMap<u8, String> = FxHashMap::default();
    let mut frame_index: usize = 0;
    while let Some(record) = capture.get_next_frame()? {
        match EventFrame::from_bytes(&record.payload) {
            Ok(frame) => {
                let text = outputs.entry(record.channel).or_default();
                text.push_str(&format!("frame {frame_index}\n"));
                for hit in &frame.hits {
                    let code = mode.decompose(hit.tot_data, hit.tot_overflow);
                    text.push_str(&format!(
                        "{} {} {} {} {} {}\n",
                        hit.pixel_index,
                        hit.toa_data,
                        code.coarse,
                        code.fine,
                        hit.toa_overflow,
                        hit.tot_overflow,
                    ));
                }
                frame_index += 1;
            }
            Err(e) => {
                log::warn!("Skipping malformed record: {e}");
            }
        }
        progress.update(capture.bytes_read())?;
    }

    let mut written = Vec::new();
    for (channel, text) in outputs {
        let out_path = output_path_for(path, channel);
        std::fs::write(&out_path, text)?;
        log::info!("Wrote {}", out_path.to_string_lossy());
        written.push(out_path);
    }
    progress.finish()?;
    Ok(written)
}

/// Pick the per-channel output file name, appending a timestamp when the
/// name is already taken.
fn output_path_for(path: &Path, channel: u8) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| String::from("capture"));
    let parent = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let mut base = parent.join(format!("{stem}_fpga{channel}"));
    if base.with_extension("txt").exists() {
        let ts = time::OffsetDateTime::now_utc().unix_timestamp();
        base = parent.join(format!("{stem}_fpga{channel}_{ts}"));
        log::info!("File exists, will be saved as {}.txt", base.to_string_lossy());
    }
    base.with_extension("txt")
}

/// Accumulate every hit word of a capture into a fresh accumulator.
/// Payloads here are streams of bare hit words, not framed events.
fn accumulate_capture(
    path: &Path,
    tx: &Sender<TaskStatus>,
    file_index: usize,
) -> Result<HitAccumulator, ProcessorError> {
    let mut capture = CaptureFile::new(path)?;
    let mut progress = Progress::start(tx, file_index, capture.total_size_bytes())?;
    let mut accumulator = HitAccumulator::new();
    while let Some(record) = capture.get_next_frame()? {
        if let Err(e) = accumulator.accept_payload(&record.payload) {
            log::warn!("Skipping malformed record: {e}");
        }
        progress.update(capture.bytes_read())?;
    }
    progress.finish()?;
    Ok(accumulator)
}

/// Build the TOT fine-interpolator calibration table from a capture and save
/// it to the configured calibration path.
pub fn calibrate_capture(
    path: &Path,
    config: &Config,
    tx: &Sender<TaskStatus>,
) -> Result<TotFineCalibration, ProcessorError> {
    log::info!(
        "Building {:?} TOT fine calibration from {}",
        config.tot_mode,
        path.to_string_lossy()
    );
    let accumulator = accumulate_capture(path, tx, 0)?;
    let fine_codes = &accumulator.series(config.tot_mode).fine;

    let widths = TotFineCalibration::fine_bin_widths(fine_codes)?;
    let widths_ps: Vec<f64> = widths
        .iter()
        .map(|w| w * 2.0 * config.lsb_totc_ps)
        .collect();
    log::info!("TOT fine interpolator bin widths [ps]: {widths_ps:?}");

    let calibration = TotFineCalibration::from_fine_codes(fine_codes)?;
    log::info!(
        "Average TOT LSB = {} ps over {} valid measurements",
        calibration.mean_fine_lsb_ps(config.lsb_totc_ps),
        fine_codes.len(),
    );
    calibration.save(&config.calibration_path)?;
    log::info!(
        "Saved calibration to {}",
        config.calibration_path.to_string_lossy()
    );
    Ok(calibration)
}

/// Offline TOT sweep analysis: one capture file per sweep step, in sweep
/// order. Loads the configured calibration table and produces the per-step
/// linearized TOT summary.
pub fn analyze_tot_captures(
    paths: &[PathBuf],
    config: &Config,
    tx: &Sender<TaskStatus>,
) -> Result<TotSweepSummary, ProcessorError> {
    let calibration = TotFineCalibration::load(&config.calibration_path)?;

    let mut steps = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        log::info!("Processing data for sweep step {index}...");
        let mut accumulator = accumulate_capture(path, tx, index)?;
        let (toa, tot) = accumulator.take_step(config.tot_mode);
        steps.push(SweepStep {
            value: config.sweep_start + index as u32 * config.sweep_step,
            toa,
            tot,
        });
    }

    if steps.iter().all(|s| s.toa.is_empty() && s.tot.is_empty()) {
        return Err(ProcessorError::SweepError(SweepError::NoData));
    }
    let data = SweepData {
        mode: config.tot_mode,
        steps,
    };
    let summary = data.tot_summary(&calibration, config.lsb_totc_ps);
    for step in &summary.steps {
        log::info!(
            "Step {}: valid = {}, mean = {} ps, stdev = {} ps",
            step.value,
            step.valid_count,
            step.mean_ps,
            step.stdev_ps,
        );
    }
    log::info!(
        "Average stdev = {} ps, mean fine LSB = {} ps",
        summary.mean_stdev_ps,
        summary.mean_fine_lsb_ps,
    );
    Ok(summary)
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::encode_record;
    use crate::frame::{EventHeader, PixelHit};
    use std::sync::mpsc::channel;

    fn test_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("altiroc_{}_{}.dat", name, std::process::id()))
    }

    fn hit_word(tot_data: u16) -> u32 {
        PixelHit {
            pixel_index: 4,
            tot_overflow: 0,
            tot_data,
            toa_overflow: 0,
            toa_data: 0x21,
            hit: 1,
            sof: 0,
        }
        .to_word()
    }

    fn event_frame_payload() -> Vec<u8> {
        let header = EventHeader {
            format_version: 1,
            pix_read_iteration: 0,
            start_pix: 4,
            stop_pix: 5,
        };
        let words = [header.to_word(), 7, hit_word(0x50), hit_word(0x51)];
        let mut buf = Vec::new();
        for w in words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_dump_counts_records() {
        let path = test_path("dump");
        let mut bytes = encode_record(0, &hit_word(0x50).to_le_bytes());
        bytes.extend(encode_record(0, &event_frame_payload()));
        bytes.extend(encode_record(0, &[1, 2, 3])); // misaligned
        std::fs::write(&path, &bytes).unwrap();

        let (tx, _rx) = channel();
        let summary = dump_capture(&path, &tx, 0).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(summary.records, 3);
        assert_eq!(summary.single_word_events, 1);
        assert_eq!(summary.event_frames, 1);
        assert_eq!(summary.pixel_hits, 2);
        assert_eq!(summary.malformed, 1);
    }

    #[test]
    fn test_convert_writes_per_channel_text() {
        let path = test_path("convert");
        let mut bytes = encode_record(0, &event_frame_payload());
        bytes.extend(encode_record(1, &event_frame_payload()));
        std::fs::write(&path, &bytes).unwrap();

        let (tx, _rx) = channel();
        let written = convert_capture(&path, TotMode::Vpa, &tx, 0).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(written.len(), 2);
        for out in &written {
            let text = std::fs::read_to_string(out).unwrap();
            // 0x50: vpa fine = 0, coarse = 0x14 = 20
            assert!(text.lines().next().unwrap().starts_with("frame "));
            assert!(text.contains("4 33 20 0 0 0\n"));
            std::fs::remove_file(out).unwrap();
        }
    }

    #[test]
    fn test_calibrate_and_analyze_round_trip() {
        let capture_path = test_path("calibrate");
        // Bare hit-word stream: fine codes 0 and 1 in equal measure
        let mut bytes = Vec::new();
        for _ in 0..8 {
            bytes.extend(encode_record(0, &hit_word(0x50).to_le_bytes()));
            bytes.extend(encode_record(0, &hit_word(0x51).to_le_bytes()));
        }
        std::fs::write(&capture_path, &bytes).unwrap();

        let config = Config {
            calibration_path: test_path("calibrate_table").with_extension("txt"),
            ..Config::default()
        };
        let (tx, _rx) = channel();
        let calibration = calibrate_capture(&capture_path, &config, &tx).unwrap();
        assert_eq!(calibration.bin(0), 0.25);
        assert_eq!(calibration.bin(1), 0.75);

        let summary =
            analyze_tot_captures(&[capture_path.clone()], &config, &tx).unwrap();
        assert_eq!(summary.steps.len(), 1);
        assert_eq!(summary.steps[0].valid_count, 16);

        std::fs::remove_file(&capture_path).unwrap();
        std::fs::remove_file(&config.calibration_path).unwrap();
    }
}
