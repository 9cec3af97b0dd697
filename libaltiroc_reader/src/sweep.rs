use std::time::Duration;

use super::accumulator::{SharedAccumulator, TotMode, TotSeries};
use super::calibration::TotFineCalibration;
use super::error::{DeviceError, SweepError};
use super::stats;

/// Device-control side of a sweep: the external collaborator that programs
/// the swept parameter (delay or pulser DAC) and fires calibration pulses.
/// The core imposes nothing on the implementation beyond these two calls.
pub trait SweepDevice {
    /// Program the swept parameter for the next step.
    fn set_step(&mut self, value: u32) -> Result<(), DeviceError>;
    /// Fire one calibration pulse.
    fn trigger(&mut self) -> Result<(), DeviceError>;
}

/// One scan over a control parameter: the value range, the number of trigger
/// iterations per step, and the bounded wait per step.
#[derive(Debug, Clone)]
pub struct SweepPlan {
    pub start: u32,
    pub stop: u32,
    pub step: u32,
    pub iterations: usize,
    pub step_timeout: Duration,
}

impl SweepPlan {
    /// The swept values, `[start, stop)` with the configured stride.
    pub fn values(&self) -> Vec<u32> {
        (self.start..self.stop)
            .step_by(self.step.max(1) as usize)
            .collect()
    }
}

/// The series collected at one sweep step.
#[derive(Debug, Clone)]
pub struct SweepStep {
    pub value: u32,
    pub toa: Vec<u8>,
    pub tot: TotSeries,
}

/// All steps of a finished sweep, in sweep order. The step index is the
/// record key; per-step results are never named dynamically.
#[derive(Debug, Clone)]
pub struct SweepData {
    pub mode: TotMode,
    pub steps: Vec<SweepStep>,
}

/// Per-step TOA statistics, in TOA LSB units.
#[derive(Debug, Clone)]
pub struct ToaStepSummary {
    pub value: u32,
    pub hit_count: usize,
    pub mean: f64,
    pub stdev: f64,
}

#[derive(Debug, Clone)]
pub struct ToaSweepSummary {
    pub steps: Vec<ToaStepSummary>,
    /// Average stdev over steps that collected data.
    pub mean_stdev: f64,
    /// TOA LSB estimate in picoseconds from the linear fit of mean TOA
    /// against delay; None when too few points survive the trim.
    pub lsb_estimate_ps: Option<f64>,
}

/// Per-step linearized TOT statistics, in picoseconds.
#[derive(Debug, Clone)]
pub struct TotStepSummary {
    pub value: u32,
    pub valid_count: usize,
    pub mean_ps: f64,
    pub stdev_ps: f64,
}

#[derive(Debug, Clone)]
pub struct TotSweepSummary {
    pub steps: Vec<TotStepSummary>,
    pub mean_stdev_ps: f64,
    pub mean_fine_lsb_ps: f64,
}

impl SweepData {
    /// Summarize the TOA series of every step.
    ///
    /// The per-step stdev carries the 1/12 quantization term of the TOA TDC.
    /// The LSB estimate fits a line through the non-empty step means after
    /// trimming `safety_bound` points from each end, so the fit stays away
    /// from the edges of the pulse.
    pub fn toa_summary(&self, delay_step_ps: f64, safety_bound: usize) -> ToaSweepSummary {
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let values: Vec<f64> = step.toa.iter().map(|v| *v as f64).collect();
            steps.push(ToaStepSummary {
                value: step.value,
                hit_count: values.len(),
                mean: stats::mean(&values).unwrap_or(0.0),
                stdev: stats::quantization_stdev(&values, 1.0).unwrap_or(0.0),
            });
        }

        let populated: Vec<&ToaStepSummary> =
            steps.iter().filter(|s| s.mean != 0.0).collect();
        let stdevs: Vec<f64> = populated.iter().map(|s| s.stdev).collect();
        let mean_stdev = stats::mean(&stdevs).unwrap_or(0.0);

        let lsb_estimate_ps = if populated.len() > 2 * safety_bound {
            let trimmed = &populated[safety_bound..populated.len() - safety_bound];
            let x: Vec<f64> = trimmed.iter().map(|s| s.value as f64).collect();
            let y: Vec<f64> = trimmed.iter().map(|s| s.mean).collect();
            stats::linear_slope(&x, &y).map(|slope| delay_step_ps / slope.abs())
        } else {
            None
        };
        if lsb_estimate_ps.is_none() {
            log::warn!("Too few populated sweep steps to estimate the TOA LSB; skipping fit");
        }

        ToaSweepSummary {
            steps,
            mean_stdev,
            lsb_estimate_ps,
        }
    }

    /// Summarize the linearized TOT of every step using a calibration table.
    ///
    /// The per-step stdev carries the quantization term of the mean fine LSB.
    pub fn tot_summary(
        &self,
        calibration: &TotFineCalibration,
        lsb_totc: f64,
    ) -> TotSweepSummary {
        let mean_fine_lsb_ps = calibration.mean_fine_lsb_ps(lsb_totc);
        let mut steps = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let values: Vec<f64> = step
                .tot
                .fine
                .iter()
                .zip(step.tot.coarse.iter())
                .zip(step.tot.coarse_int1.iter())
                .map(|((f, c), int1)| calibration.linearized_tot(*f, *c, *int1, lsb_totc))
                .collect();
            steps.push(TotStepSummary {
                value: step.value,
                valid_count: values.len(),
                mean_ps: stats::mean(&values).unwrap_or(0.0),
                stdev_ps: stats::quantization_stdev(&values, mean_fine_lsb_ps).unwrap_or(0.0),
            });
        }

        let stdevs: Vec<f64> = steps
            .iter()
            .filter(|s| s.stdev_ps != 0.0)
            .map(|s| s.stdev_ps)
            .collect();
        TotSweepSummary {
            steps,
            mean_stdev_ps: stats::mean(&stdevs).unwrap_or(0.0),
            mean_fine_lsb_ps,
        }
    }
}

/// Runs a sweep against a device, collecting one [`SweepStep`] per value.
///
/// The transport collaborator feeds the shared accumulator from wherever
/// frames arrive; the controller clears it, programs the step, fires the
/// triggers, and blocks with a bounded timeout until the step's hit target is
/// reached.
#[derive(Debug)]
pub struct SweepController {
    accumulator: SharedAccumulator,
    plan: SweepPlan,
    mode: TotMode,
}

impl SweepController {
    pub fn new(accumulator: SharedAccumulator, plan: SweepPlan, mode: TotMode) -> Self {
        Self {
            accumulator,
            plan,
            mode,
        }
    }

    /// Execute the sweep. A step that times out keeps whatever it collected
    /// and the sweep moves on; a sweep where every step came back empty is
    /// reported as [`SweepError::NoData`] so the caller can decide whether to
    /// abort the scan.
    pub fn run(&self, device: &mut dyn SweepDevice) -> Result<SweepData, SweepError> {
        let mut steps = Vec::new();
        for value in self.plan.values() {
            log::info!("Sweeping value {value}...");
            self.accumulator.clear()?;
            device.set_step(value)?;
            for _ in 0..self.plan.iterations {
                device.trigger()?;
            }
            match self.accumulator.wait_for_count(
                self.plan.iterations,
                value,
                self.plan.step_timeout,
            ) {
                Ok(_) => (),
                Err(SweepError::Timeout {
                    step,
                    collected,
                    target,
                }) => {
                    log::warn!(
                        "Sweep step {step} timed out with {collected} of {target} hits; keeping partial data"
                    );
                }
                Err(e) => return Err(e),
            }
            let (toa, tot) = self.accumulator.take_step(self.mode)?;
            steps.push(SweepStep { value, toa, tot });
        }

        if steps.iter().all(|s| s.toa.is_empty() && s.tot.is_empty()) {
            return Err(SweepError::NoData);
        }
        Ok(SweepData {
            mode: self.mode,
            steps,
        })
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelHit;

    /// Fake device that feeds the shared accumulator directly on trigger.
    struct LoopbackDevice {
        accumulator: SharedAccumulator,
        toa_per_value: bool,
    }

    impl SweepDevice for LoopbackDevice {
        fn set_step(&mut self, _value: u32) -> Result<(), DeviceError> {
            Ok(())
        }

        fn trigger(&mut self) -> Result<(), DeviceError> {
            let hit = PixelHit {
                pixel_index: 4,
                tot_overflow: 0,
                tot_data: 0x50,
                toa_overflow: if self.toa_per_value { 0 } else { 1 },
                toa_data: 0x30,
                hit: if self.toa_per_value { 1 } else { 0 },
                sof: 0,
            };
            self.accumulator
                .accept_payload(&hit.to_word().to_le_bytes())
                .map_err(|e| DeviceError(e.to_string()))
        }
    }

    fn plan(iterations: usize) -> SweepPlan {
        SweepPlan {
            start: 0,
            stop: 3,
            step: 1,
            iterations,
            step_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn test_plan_values() {
        let p = SweepPlan {
            start: 2300,
            stop: 2330,
            step: 10,
            iterations: 16,
            step_timeout: Duration::from_secs(1),
        };
        assert_eq!(p.values(), vec![2300, 2310, 2320]);
    }

    #[test]
    fn test_sweep_collects_per_step() {
        let accumulator = SharedAccumulator::new();
        let controller = SweepController::new(accumulator.clone(), plan(4), TotMode::Vpa);
        let mut device = LoopbackDevice {
            accumulator,
            toa_per_value: true,
        };
        let data = controller.run(&mut device).unwrap();
        assert_eq!(data.steps.len(), 3);
        for step in &data.steps {
            assert_eq!(step.toa.len(), 4);
            assert_eq!(step.tot.len(), 4);
        }
    }

    #[test]
    fn test_sweep_with_no_hits_is_no_data() {
        // Every word arrives without the hit flag: the wait times out, the
        // partial (empty) step is kept, and the sweep ends with NoData.
        let accumulator = SharedAccumulator::new();
        let controller = SweepController::new(accumulator.clone(), plan(2), TotMode::Vpa);
        let mut device = LoopbackDevice {
            accumulator,
            toa_per_value: false,
        };
        assert!(matches!(
            controller.run(&mut device),
            Err(SweepError::NoData)
        ));
    }

    #[test]
    fn test_toa_summary_fit() {
        // Means rise linearly with the swept value: slope 2 LSB per step.
        let steps = (0..6u32)
            .map(|value| SweepStep {
                value,
                toa: vec![(value * 2) as u8 + 10; 8],
                tot: TotSeries::default(),
            })
            .collect();
        let data = SweepData {
            mode: TotMode::Vpa,
            steps,
        };
        let summary = data.toa_summary(9.5582, 1);
        assert_eq!(summary.steps.len(), 6);
        assert_eq!(summary.steps[0].hit_count, 8);
        assert_eq!(summary.steps[2].mean, 14.0);
        // Constant data per step: only the 1/12 quantization term
        let expected = (1.0f64 / 12.0).sqrt();
        assert!((summary.steps[0].stdev - expected).abs() < 1e-12);
        let lsb = summary.lsb_estimate_ps.unwrap();
        assert!((lsb - 9.5582 / 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_tot_summary() {
        let calibration = TotFineCalibration::from_fine_codes(&[0, 0, 1, 1]).unwrap();
        let tot = TotSeries {
            fine: vec![4, 0],
            coarse: vec![2, 1],
            coarse_int1: vec![1, 3],
        };
        let data = SweepData {
            mode: TotMode::Vpa,
            steps: vec![SweepStep {
                value: 5,
                toa: vec![],
                tot,
            }],
        };
        let summary = data.tot_summary(&calibration, 160.0);
        assert_eq!(summary.steps[0].valid_count, 2);
        let expected_mean = (calibration.linearized_tot(4, 2, 1, 160.0)
            + calibration.linearized_tot(0, 1, 3, 160.0))
            / 2.0;
        assert!((summary.steps[0].mean_ps - expected_mean).abs() < 1e-9);
        assert_eq!(summary.mean_fine_lsb_ps, 0.5 * 2.0 * 160.0);
    }
}
