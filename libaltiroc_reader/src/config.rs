use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::accumulator::TotMode;
use super::error::ConfigError;
use super::sweep::SweepPlan;

/// Test-stand run configuration. Contains the scan parameters, the TOT
/// processing chain selection, and the calibration constants.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Pixel under test; must match the pixel range programmed into the ASIC
    /// readout, which is what ends up in the frame headers.
    pub pixel_number: u8,
    /// Discriminator threshold DAC, passed through to the device plane.
    pub dac_vth: u16,
    /// Injected charge DAC, passed through to the device plane.
    pub qinj: u16,
    pub tot_mode: TotMode,
    /// Estimate of the TOT coarse LSB in picoseconds.
    pub lsb_totc_ps: f64,
    /// Estimate of the programmable delay step in picoseconds.
    pub delay_step_ps: f64,
    pub iterations_per_step: usize,
    pub sweep_start: u32,
    pub sweep_stop: u32,
    pub sweep_step: u32,
    pub step_timeout_ms: u64,
    pub calibration_path: PathBuf,
}

impl Default for Config {
    /// Defaults matching the reference test-stand scripts.
    fn default() -> Self {
        Self {
            pixel_number: 4,
            dac_vth: 320,
            qinj: 13,
            tot_mode: TotMode::Vpa,
            lsb_totc_ps: 160.0,
            delay_step_ps: 9.5582,
            iterations_per_step: 16,
            sweep_start: 0,
            sweep_stop: 20,
            sweep_step: 1,
            step_timeout_ms: 1000,
            calibration_path: PathBuf::from("TestData/TOT_fine_calibration.txt"),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// The sweep this config describes.
    pub fn sweep_plan(&self) -> SweepPlan {
        SweepPlan {
            start: self.sweep_start,
            stop: self.sweep_stop,
            step: self.sweep_step,
            iterations: self.iterations_per_step,
            step_timeout: self.step_timeout(),
        }
    }

    pub fn is_sweep_valid(&self) -> bool {
        self.sweep_stop > self.sweep_start && self.sweep_step >= 1
    }
}

//Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_round_trip() {
        let config = Config {
            tot_mode: TotMode::Tz,
            sweep_stop: 40,
            ..Config::default()
        };
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.tot_mode, TotMode::Tz);
        assert_eq!(back.sweep_stop, 40);
        assert_eq!(back.lsb_totc_ps, 160.0);
    }

    #[test]
    fn test_sweep_plan() {
        let config = Config::default();
        let plan = config.sweep_plan();
        assert_eq!(plan.values().len(), 20);
        assert_eq!(plan.iterations, 16);
        assert!(config.is_sweep_valid());
    }

    #[test]
    fn test_missing_config_file() {
        let path = PathBuf::from("/definitely/not/here.yml");
        assert!(matches!(
            Config::read_config_file(&path),
            Err(ConfigError::BadFilePath(_))
        ));
    }
}
