//! Time-varying prediction horizon.
//!
//! The horizon grows smoothly from zero at the time origin towards its
//! terminal length, `T(t) = T_f · (1 - exp(-α (t - t0)))`. Starting from a
//! zero-length horizon lets the controller begin at a trivially optimal
//! solution and track it while the horizon opens up.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HorizonSettings {
    pub final_length: f64,
    pub growth_rate: f64,
    #[serde(default)]
    pub initial_time: f64,
}

impl Default for HorizonSettings {
    fn default() -> Self {
        Self {
            final_length: 1.0,
            growth_rate: 1.0,
            initial_time: 0.0,
        }
    }
}

impl HorizonSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.final_length.is_finite() && self.final_length > 0.0) {
            bail!("final_length must be positive, got {}.", self.final_length);
        }
        if !(self.growth_rate.is_finite() && self.growth_rate >= 0.0) {
            bail!("growth_rate must be non-negative, got {}.", self.growth_rate);
        }
        if !self.initial_time.is_finite() {
            bail!("initial_time must be finite.");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Horizon {
    settings: HorizonSettings,
}

impl Horizon {
    pub fn new(settings: HorizonSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> HorizonSettings {
        self.settings
    }

    /// Horizon length at `time`. A growth rate of zero selects a fixed
    /// horizon of length `final_length`.
    pub fn length(&self, time: f64) -> f64 {
        let s = &self.settings;
        if s.growth_rate == 0.0 {
            return s.final_length;
        }
        let elapsed = time - s.initial_time;
        if elapsed <= 0.0 {
            return 0.0;
        }
        s.final_length * (1.0 - (-s.growth_rate * elapsed).exp())
    }

    pub fn reset(&mut self, final_length: f64, growth_rate: f64, initial_time: f64) -> Result<()> {
        let settings = HorizonSettings {
            final_length,
            growth_rate,
            initial_time,
        };
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    pub fn reset_origin(&mut self, initial_time: f64) -> Result<()> {
        self.reset(
            self.settings.final_length,
            self.settings.growth_rate,
            initial_time,
        )
    }
}
