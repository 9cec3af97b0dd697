use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::constants::{TOT_SENTINEL_TZ, TOT_SENTINEL_VPA};
use super::error::{FrameError, SweepError};
use super::frame::{decode_hit_words, PixelHit};

/// The TOT TDC processing chain selection. The two analog front ends split
/// the 9-bit TOT code differently between fine and coarse counters and use
/// different "no valid TOT" sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotMode {
    /// Voltage preamplifier chain: 2-bit fine, 7-bit coarse, sentinel 0x1FC.
    Vpa,
    /// TZ chain: 3-bit fine, 6-bit coarse, sentinel 0x1F8.
    Tz,
}

impl TotMode {
    pub fn sentinel(&self) -> u16 {
        match self {
            TotMode::Vpa => TOT_SENTINEL_VPA,
            TotMode::Tz => TOT_SENTINEL_TZ,
        }
    }

    /// Decompose a raw TOT code into fine, coarse, and interpolated-coarse
    /// values for this chain. The overflow bit extends the fine code by one
    /// bit. The interpolated coarse value rounds the *pre-mask* shifted code
    /// up by one half step, then narrows by one bit.
    pub fn decompose(&self, tot_data: u16, tot_overflow: u8) -> TotCode {
        match self {
            TotMode::Vpa => {
                let coarse_raw = tot_data >> 2;
                TotCode {
                    fine: (tot_data & 0x3) + tot_overflow as u16 * 4,
                    coarse: coarse_raw & 0x7F,
                    coarse_int1: ((coarse_raw + 1) >> 1) & 0x3F,
                }
            }
            TotMode::Tz => {
                let coarse_raw = tot_data >> 3;
                TotCode {
                    fine: (tot_data & 0x7) + tot_overflow as u16 * 8,
                    coarse: coarse_raw & 0x3F,
                    coarse_int1: ((coarse_raw + 1) >> 1) & 0x1F,
                }
            }
        }
    }
}

/// One decomposed TOT measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TotCode {
    pub fine: u16,
    pub coarse: u16,
    pub coarse_int1: u16,
}

/// Append-only, insertion-ordered series of decomposed TOT codes for one
/// processing chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TotSeries {
    pub fine: Vec<u16>,
    pub coarse: Vec<u16>,
    pub coarse_int1: Vec<u16>,
}

impl TotSeries {
    fn push(&mut self, code: TotCode) {
        self.fine.push(code.fine);
        self.coarse.push(code.coarse);
        self.coarse_int1.push(code.coarse_int1);
    }

    pub fn len(&self) -> usize {
        self.fine.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fine.is_empty()
    }

    fn clear(&mut self) {
        self.fine.clear();
        self.coarse.clear();
        self.coarse_int1.clear();
    }
}

/// Classifies a stream of pixel hits into the derived measurement series.
///
/// Each hit is evaluated against every series independently, so one hit may
/// contribute a TOA entry, a VPA TOT entry, and a TZ TOT entry at once, or
/// nothing at all. Series persist across frames for the lifetime of an
/// acquisition step and are cleared explicitly between sweep steps.
#[derive(Debug, Clone, Default)]
pub struct HitAccumulator {
    pub toa: Vec<u8>,
    pub vpa: TotSeries,
    pub tz: TotSeries,
}

impl HitAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route one hit into the series it qualifies for.
    ///
    /// TOA requires the hit flag and no TOA overflow; an overflowed TOA
    /// carries no timing information and is dropped, not clamped. Each TOT
    /// chain requires the hit flag and excludes its own sentinel code.
    pub fn accept(&mut self, hit: &PixelHit) {
        if hit.toa_valid() {
            self.toa.push(hit.toa_data);
        }
        if hit.is_hit() && hit.tot_data != TotMode::Vpa.sentinel() {
            self.vpa.push(TotMode::Vpa.decompose(hit.tot_data, hit.tot_overflow));
        }
        if hit.is_hit() && hit.tot_data != TotMode::Tz.sentinel() {
            self.tz.push(TotMode::Tz.decompose(hit.tot_data, hit.tot_overflow));
        }
    }

    /// Decode a raw word-aligned payload of hit words and fold every hit in.
    pub fn accept_payload(&mut self, buf: &[u8]) -> Result<(), FrameError> {
        for hit in decode_hit_words(buf)? {
            self.accept(&hit);
        }
        Ok(())
    }

    /// TOA-series length; the sweep controller uses this as the per-step
    /// completion signal.
    pub fn count(&self) -> usize {
        self.toa.len()
    }

    pub fn series(&self, mode: TotMode) -> &TotSeries {
        match mode {
            TotMode::Vpa => &self.vpa,
            TotMode::Tz => &self.tz,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.toa.is_empty() && self.vpa.is_empty() && self.tz.is_empty()
    }

    /// Empty every series. Used between sweep steps.
    pub fn clear(&mut self) {
        self.toa.clear();
        self.vpa.clear();
        self.tz.clear();
    }

    /// Move the TOA series and the selected chain's TOT series out,
    /// leaving the accumulator empty.
    pub fn take_step(&mut self, mode: TotMode) -> (Vec<u8>, TotSeries) {
        let toa = std::mem::take(&mut self.toa);
        let tot = match mode {
            TotMode::Vpa => std::mem::take(&mut self.vpa),
            TotMode::Tz => std::mem::take(&mut self.tz),
        };
        self.clear();
        (toa, tot)
    }
}

/// Thread-safe handle around a [`HitAccumulator`] for the case where frame
/// delivery and sweep control live on different threads.
///
/// The producer appends decoded payloads and notifies; the consumer blocks on
/// [`SharedAccumulator::wait_for_count`] with a bounded timeout instead of
/// spinning on the count.
#[derive(Debug, Clone, Default)]
pub struct SharedAccumulator {
    inner: Arc<(Mutex<HitAccumulator>, Condvar)>,
}

impl SharedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Producer entry point: decode a delivered payload, fold it in, and wake
    /// any waiting consumer.
    pub fn accept_payload(&self, buf: &[u8]) -> Result<(), FrameError> {
        let (lock, cvar) = &*self.inner;
        let mut acc = match lock.lock() {
            Ok(acc) => acc,
            Err(poisoned) => poisoned.into_inner(),
        };
        acc.accept_payload(buf)?;
        cvar.notify_all();
        Ok(())
    }

    /// Block until the TOA count reaches `target` or `timeout` elapses.
    /// Returns the count observed at wakeup.
    pub fn wait_for_count(
        &self,
        target: usize,
        step: u32,
        timeout: Duration,
    ) -> Result<usize, SweepError> {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut acc = lock.lock().map_err(|_| SweepError::Poisoned)?;
        while acc.count() < target {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SweepError::Timeout {
                    step,
                    collected: acc.count(),
                    target,
                });
            }
            let (guard, wait) = cvar
                .wait_timeout(acc, remaining)
                .map_err(|_| SweepError::Poisoned)?;
            acc = guard;
            if wait.timed_out() && acc.count() < target {
                return Err(SweepError::Timeout {
                    step,
                    collected: acc.count(),
                    target,
                });
            }
        }
        Ok(acc.count())
    }

    pub fn clear(&self) -> Result<(), SweepError> {
        let (lock, _) = &*self.inner;
        let mut acc = lock.lock().map_err(|_| SweepError::Poisoned)?;
        acc.clear();
        Ok(())
    }

    /// Move the finished step's series out of the accumulator.
    pub fn take_step(&self, mode: TotMode) -> Result<(Vec<u8>, TotSeries), SweepError> {
        let (lock, _) = &*self.inner;
        let mut acc = lock.lock().map_err(|_| SweepError::Poisoned)?;
        Ok(acc.take_step(mode))
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    fn hit(tot_data: u16, toa_overflow: u8) -> PixelHit {
        PixelHit {
            pixel_index: 4,
            tot_overflow: 0,
            tot_data,
            toa_overflow,
            toa_data: 0x20,
            hit: 1,
            sof: 0,
        }
    }

    #[test]
    fn test_classification_independence() {
        // Valid in both chains and for TOA: one hit, three series entries.
        let mut acc = HitAccumulator::new();
        acc.accept(&hit(0x50, 0));
        assert_eq!(acc.toa, vec![0x20]);
        assert_eq!(acc.vpa.len(), 1);
        assert_eq!(acc.tz.len(), 1);
    }

    #[test]
    fn test_vpa_sentinel_is_mode_specific() {
        let mut acc = HitAccumulator::new();
        acc.accept(&hit(TOT_SENTINEL_VPA, 0));
        assert_eq!(acc.vpa.len(), 0);
        assert_eq!(acc.tz.len(), 1);
        assert_eq!(acc.toa.len(), 1);
    }

    #[test]
    fn test_tz_sentinel_is_mode_specific() {
        let mut acc = HitAccumulator::new();
        acc.accept(&hit(TOT_SENTINEL_TZ, 0));
        assert_eq!(acc.tz.len(), 0);
        assert_eq!(acc.vpa.len(), 1);
    }

    #[test]
    fn test_toa_overflow_dropped_independently() {
        let mut acc = HitAccumulator::new();
        acc.accept(&hit(TOT_SENTINEL_VPA, 1));
        assert_eq!(acc.toa.len(), 0);
        assert_eq!(acc.tz.len(), 1);
    }

    #[test]
    fn test_no_hit_flag_rejected_everywhere() {
        let mut acc = HitAccumulator::new();
        let mut h = hit(0x50, 0);
        h.hit = 0;
        acc.accept(&h);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_decomposition_vpa() {
        // tot = 0b1_0110_1110 = 0x16E: fine = 0b10 = 2, coarse = 0b1011011 = 91
        let code = TotMode::Vpa.decompose(0x16E, 0);
        assert_eq!(code.fine, 2);
        assert_eq!(code.coarse, 91);
        assert_eq!(code.coarse_int1, (91 + 1) >> 1);
        // Overflow extends the fine code past the 2-bit range
        assert_eq!(TotMode::Vpa.decompose(0x16E, 1).fine, 6);
    }

    #[test]
    fn test_decomposition_tz() {
        let code = TotMode::Tz.decompose(0x16E, 0);
        assert_eq!(code.fine, 6);
        assert_eq!(code.coarse, 45);
        assert_eq!(code.coarse_int1, (45 + 1) >> 1);
        assert_eq!(TotMode::Tz.decompose(0x16E, 1).fine, 14);
    }

    #[test]
    fn test_interpolated_coarse_uses_premask_value() {
        // tot = 0x1FF: vpa coarse_raw = 127, (127+1)>>1 = 64, narrowed to 0
        let code = TotMode::Vpa.decompose(0x1FF, 0);
        assert_eq!(code.coarse, 127);
        assert_eq!(code.coarse_int1, 0);
    }

    #[test]
    fn test_clear_empties_all_series() {
        let mut acc = HitAccumulator::new();
        for _ in 0..5 {
            acc.accept(&hit(0x50, 0));
        }
        assert_eq!(acc.count(), 5);
        acc.clear();
        assert_eq!(acc.count(), 0);
        assert!(acc.vpa.is_empty());
        assert!(acc.tz.is_empty());
        assert!(acc.is_empty());
    }

    #[test]
    fn test_shared_wait_satisfied() {
        let shared = SharedAccumulator::new();
        let producer = shared.clone();
        let payload: Vec<u8> = hit(0x50, 0).to_word().to_le_bytes().to_vec();
        let handle = std::thread::spawn(move || {
            for _ in 0..4 {
                producer.accept_payload(&payload).unwrap();
            }
        });
        let count = shared
            .wait_for_count(4, 0, Duration::from_secs(5))
            .unwrap();
        assert!(count >= 4);
        handle.join().unwrap();
    }

    #[test]
    fn test_shared_wait_times_out() {
        let shared = SharedAccumulator::new();
        let result = shared.wait_for_count(1, 7, Duration::from_millis(10));
        match result {
            Err(SweepError::Timeout {
                step,
                collected,
                target,
            }) => {
                assert_eq!(step, 7);
                assert_eq!(collected, 0);
                assert_eq!(target, 1);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
