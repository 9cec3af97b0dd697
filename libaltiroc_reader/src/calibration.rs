use std::path::Path;

use super::constants::{CALIB_FILE_LEN, CALIB_TABLE_LEN, TOT_FINE_RANGE};
use super::error::CalibrationError;

/// TOT fine-interpolator calibration table.
///
/// Entries 0..16 map each fine code to its fractional position within one
/// coarse LSB; entry 16 holds the mean fine-LSB width. The table is built
/// offline by histogramming fine codes over a large hit sample and must
/// reproduce bit-exact values so acquisition runs stay comparable across
/// sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct TotFineCalibration {
    bins: [f64; CALIB_TABLE_LEN],
}

impl TotFineCalibration {
    pub fn from_bins(bins: [f64; CALIB_TABLE_LEN]) -> Self {
        Self { bins }
    }

    /// Build the table from a sample of raw fine codes.
    ///
    /// The per-code populations are placed one slot up, normalized against
    /// the total, and accumulated into a cumulative-distribution bin edge:
    /// `bins[i] = (count[i] / 2 + cumsum(count)[i-1..=i]) / total`, with the
    /// mean of the non-zero raw populations written into slot 16. Codes
    /// outside the 16-code fine range do not contribute.
    pub fn from_fine_codes(codes: &[u16]) -> Result<Self, CalibrationError> {
        let mut raw = [0.0f64; CALIB_FILE_LEN];
        for &code in codes {
            if (code as usize) < TOT_FINE_RANGE {
                raw[code as usize + 1] += 1.0;
            }
        }
        let total: f64 = raw.iter().sum();
        if total == 0.0 {
            return Err(CalibrationError::EmptySample);
        }

        let populated: Vec<f64> = raw.iter().copied().filter(|v| *v != 0.0).collect();
        let mean_lsb = populated.iter().sum::<f64>() / populated.len() as f64 / total;

        let mut bins = [0.0f64; CALIB_TABLE_LEN];
        let mut cumsum = 0.0;
        for (i, bin) in bins.iter_mut().enumerate() {
            cumsum += raw[i];
            *bin = (raw[i + 1] / 2.0 + cumsum) / total;
        }
        bins[CALIB_TABLE_LEN - 1] = mean_lsb;
        Ok(Self { bins })
    }

    /// Normalized population of each fine code, for linearity diagnostics.
    pub fn fine_bin_widths(codes: &[u16]) -> Result<[f64; TOT_FINE_RANGE], CalibrationError> {
        let mut widths = [0.0f64; TOT_FINE_RANGE];
        for &code in codes {
            if (code as usize) < TOT_FINE_RANGE {
                widths[code as usize] += 1.0;
            }
        }
        let total: f64 = widths.iter().sum();
        if total == 0.0 {
            return Err(CalibrationError::EmptySample);
        }
        for w in widths.iter_mut() {
            *w /= total;
        }
        Ok(widths)
    }

    /// Fractional position of a fine code within one coarse LSB.
    /// `fine` must be below the 16-code range (guaranteed by the TOT
    /// decomposition, where the overflow bit extends it to at most 15).
    pub fn bin(&self, fine: u16) -> f64 {
        self.bins[fine as usize]
    }

    /// Mean fine-LSB width in table units (slot 16).
    pub fn mean_fine_lsb(&self) -> f64 {
        self.bins[CALIB_TABLE_LEN - 1]
    }

    /// Mean fine-LSB width in picoseconds for a given coarse LSB.
    pub fn mean_fine_lsb_ps(&self, lsb_totc: f64) -> f64 {
        self.mean_fine_lsb() * 2.0 * lsb_totc
    }

    /// Dead-zone correction term near fine-code boundaries: the fine
    /// interpolator loses codes at the top of even coarse steps and at the
    /// bottom of odd ones.
    pub fn correction(&self, fine: u16, coarse: u16) -> f64 {
        if fine > 3 && coarse & 1 == 0 {
            2.0
        } else if fine == 0 && coarse & 1 == 1 {
            -self.bins[0] * 2.0
        } else {
            0.0
        }
    }

    /// Convert a raw (fine, coarse, interpolated-coarse) triple into a
    /// linearized time in picoseconds. `lsb_totc` is the coarse-code time
    /// step in picoseconds.
    pub fn linearized_tot(&self, fine: u16, coarse: u16, coarse_int1: u16, lsb_totc: f64) -> f64 {
        let value = 2.0 * (coarse_int1 as f64 * 2.0 + 1.0 - self.bin(fine)) * lsb_totc;
        value + self.correction(fine, coarse) * lsb_totc
    }

    /// Write the table as a flat text file: one float per line, the 17 table
    /// entries followed by one padding zero.
    pub fn save(&self, path: &Path) -> Result<(), CalibrationError> {
        let mut out = String::new();
        for bin in &self.bins {
            out.push_str(&format!("{bin:.18e}\n"));
        }
        out.push_str(&format!("{:.18e}\n", 0.0));
        std::fs::write(path, out)?;
        Ok(())
    }

    /// Load a table written by [`TotFineCalibration::save`]. Legacy files
    /// without the padding line are accepted.
    pub fn load(path: &Path) -> Result<Self, CalibrationError> {
        if !path.exists() {
            return Err(CalibrationError::BadFilePath(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let values = text
            .split_whitespace()
            .map(|v| v.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()?;
        if values.len() != CALIB_TABLE_LEN && values.len() != CALIB_FILE_LEN {
            return Err(CalibrationError::BadEntryCount(values.len()));
        }
        let mut bins = [0.0f64; CALIB_TABLE_LEN];
        bins.copy_from_slice(&values[..CALIB_TABLE_LEN]);
        Ok(Self { bins })
    }
}
