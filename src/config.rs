use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::storage::ParameterStore;
use crate::{Error, Result};

/// Selectors, persistence key and numeric tuning for the controller.
///
/// Every field is defaulted, so a JSON override only needs the keys it
/// changes. Defaults target the YouTube watch page.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Player controls bar that hosts the toggle button.
    pub anchor_selector: String,
    /// The single video element whose height drives the layout.
    pub video_selector: String,
    /// Container used in cinematic (full-bleed) mode. Also the region whose
    /// viewport visibility suspends expansion.
    pub cinematic_container_selector: String,
    /// Container used in the default layout.
    pub default_container_selector: String,
    /// Storage key of the persisted expand rate.
    pub storage_key: String,
    pub default_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    /// Rate change per unit of wheel `deltaY`.
    pub wheel_step: f64,
    /// Delay (ms) of the one deferred check for an already rendered anchor.
    pub initial_retry_delay_ms: i64,
    pub button_id: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            anchor_selector: ".ytp-right-controls".into(),
            video_selector: ".video-stream.html5-main-video".into(),
            cinematic_container_selector: "#full-bleed-container".into(),
            default_container_selector: "#player-container-inner".into(),
            storage_key: "EXPAND_RATE".into(),
            default_rate: 1.1,
            min_rate: 1.0,
            max_rate: 1.3,
            wheel_step: 0.0001,
            initial_retry_delay_ms: 1_000,
            button_id: "ExpandAreaToggleButton".into(),
        }
    }
}

impl ControllerConfig {
    /// Parses a JSON override and validates the result.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|err| Error::Config(format!("invalid controller config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            Error::Config(format!("failed to read controller config {}: {err}", path.display()))
        })?;
        Self::from_json_str(&raw)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|err| Error::Config(format!("failed to serialize controller config: {err}")))
    }

    pub fn validate(&self) -> Result<()> {
        let selectors = [
            ("anchor_selector", &self.anchor_selector),
            ("video_selector", &self.video_selector),
            ("cinematic_container_selector", &self.cinematic_container_selector),
            ("default_container_selector", &self.default_container_selector),
        ];
        for (name, value) in selectors {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{name} must not be empty")));
            }
        }
        if self.storage_key.is_empty() {
            return Err(Error::Config("storage_key must not be empty".into()));
        }
        if self.button_id.trim().is_empty() || self.button_id.contains(char::is_whitespace) {
            return Err(Error::Config(format!(
                "button_id must be a single token, got {:?}",
                self.button_id
            )));
        }
        if !self.min_rate.is_finite() || !self.max_rate.is_finite() || self.min_rate > self.max_rate {
            return Err(Error::Config(format!(
                "rate bounds must be finite and ordered, got [{}, {}]",
                self.min_rate, self.max_rate
            )));
        }
        if self.min_rate <= 0.0 {
            return Err(Error::Config(format!(
                "min_rate must be positive, got {}",
                self.min_rate
            )));
        }
        if !(self.min_rate..=self.max_rate).contains(&self.default_rate) {
            return Err(Error::Config(format!(
                "default_rate {} is outside [{}, {}]",
                self.default_rate, self.min_rate, self.max_rate
            )));
        }
        if !self.wheel_step.is_finite() || self.wheel_step <= 0.0 {
            return Err(Error::Config(format!(
                "wheel_step must be a positive number, got {}",
                self.wheel_step
            )));
        }
        if self.initial_retry_delay_ms < 0 {
            return Err(Error::Config(format!(
                "initial_retry_delay_ms must not be negative, got {}",
                self.initial_retry_delay_ms
            )));
        }
        Ok(())
    }

    pub(crate) fn rate_store(&self) -> ParameterStore {
        ParameterStore::new(
            self.storage_key.clone(),
            self.default_rate,
            self.min_rate,
            self.max_rate,
        )
    }
}
