//! Named control presets
//!
//! A preset is a delta from hardware defaults: applying one resets every
//! camera control, waits for auto exposure and white balance to settle, then
//! writes the preset's values. The whole sequence runs under the registry
//! lock so no other update can interleave.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde_json::json;
use tracing::{info, instrument};

use crate::controls::{ControlRegistry, ControlUpdate, RequestedValue, UpdateOutcome};
use crate::error::{Error, Result};

fn preset(values: &[(&str, RequestedValue)]) -> ControlUpdate {
    values
        .iter()
        .map(|(id, v)| (id.to_string(), v.clone()))
        .collect()
}

fn lit(value: serde_json::Value) -> RequestedValue {
    RequestedValue::Literal(value)
}

static MODES: Lazy<BTreeMap<&'static str, ControlUpdate>> = Lazy::new(|| {
    let mut modes = BTreeMap::new();
    modes.insert(
        "Day",
        preset(&[
            ("AeEnable", lit(json!(true))),
            ("AwbEnable", lit(json!(true))),
            ("AeExposureMode", lit(json!(0))),
            ("NoiseReductionMode", lit(json!(1))),
        ]),
    );
    modes.insert(
        "Night",
        preset(&[
            ("AeEnable", lit(json!(false))),
            ("AeExposureMode", lit(json!(2))),
            ("ExposureTime", RequestedValue::Maximum),
            ("AnalogueGain", RequestedValue::Maximum),
            ("NoiseReductionMode", lit(json!(2))),
        ]),
    );
    modes.insert(
        "Sport",
        preset(&[
            ("AeEnable", lit(json!(false))),
            ("AeExposureMode", lit(json!(1))),
            ("ExposureTime", lit(json!(5000))),
            ("AnalogueGain", lit(json!(12))),
            ("Sharpness", lit(json!(1.5))),
        ]),
    );
    modes
});

/// Applies named presets through a shared [`ControlRegistry`]
#[derive(Clone)]
pub struct ModePreset {
    registry: Arc<ControlRegistry>,
    settle: Duration,
}

impl ModePreset {
    pub fn new(registry: Arc<ControlRegistry>, settle: Duration) -> Self {
        Self { registry, settle }
    }

    /// The static preset table, as served by `/modes`.
    pub fn definitions() -> &'static BTreeMap<&'static str, ControlUpdate> {
        &MODES
    }

    pub fn definition(name: &str) -> Option<&'static ControlUpdate> {
        MODES.get(name)
    }

    /// Reset to hardware defaults, settle, then apply `name`'s values.
    ///
    /// An unknown name fails before anything is touched.
    #[instrument(skip(self))]
    pub async fn apply(&self, name: &str) -> Result<UpdateOutcome> {
        let controls =
            Self::definition(name).ok_or_else(|| Error::UnknownMode(name.to_string()))?;

        let mut guard = self.registry.lock().await;
        guard.reset_to_defaults().await?;
        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }
        let outcome = guard.update(controls).await?;

        info!(mode = name, changed = outcome.changed.len(), "Mode applied");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::default_table;

    #[test]
    fn every_preset_names_known_controls() {
        let table = default_table(75, [0, 0]);
        for (mode, controls) in ModePreset::definitions() {
            for id in controls.keys() {
                assert!(
                    table.iter().any(|s| s.id == id && s.enabled),
                    "{mode} sets unknown control {id}"
                );
            }
        }
    }

    #[test]
    fn night_drives_exposure_to_maximum() {
        let night = ModePreset::definition("Night").unwrap();
        assert_eq!(night["ExposureTime"], RequestedValue::Maximum);
        assert_eq!(night["AnalogueGain"], RequestedValue::Maximum);
        assert!(ModePreset::definition("night").is_none());
    }

    #[test]
    fn table_serializes_sentinel() {
        let json = serde_json::to_value(ModePreset::definitions()).unwrap();
        assert_eq!(json["Night"]["ExposureTime"], json!("max"));
        assert_eq!(json["Sport"]["ExposureTime"], json!(5000));
    }
}
