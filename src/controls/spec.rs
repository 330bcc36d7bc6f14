use serde::Serialize;

use super::value::{ControlKind, ControlValue};
use crate::capture::LiveBounds;

/// Stream quality; routed to an encoder restart instead of the camera.
pub const QUALITY: &str = "Quality";

/// Frame rate limits in microseconds, derived from configuration.
pub const FRAME_DURATION_LIMITS: &str = "FrameDurationLimits";

/// UI hint for how a control should be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Widget {
    Checkbox,
    Range,
}

/// Static description of one control
#[derive(Debug, Clone)]
pub struct ControlSpec {
    pub id: &'static str,
    pub kind: ControlKind,
    pub widget: Widget,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub default: ControlValue,
    pub description: &'static [&'static str],
    /// Live hardware limits replace the static ones
    pub overridable_max: bool,
    /// Disabled controls are still applied but never reported
    pub enabled: bool,
}

impl ControlSpec {
    fn checkbox(id: &'static str, default: bool, description: &'static [&'static str]) -> Self {
        Self {
            id,
            kind: ControlKind::Bool,
            widget: Widget::Checkbox,
            min: None,
            max: None,
            step: None,
            default: ControlValue::Bool(default),
            description,
            overridable_max: false,
            enabled: true,
        }
    }

    fn range(
        id: &'static str,
        default: ControlValue,
        bounds: (f64, f64),
        step: f64,
        description: &'static [&'static str],
    ) -> Self {
        Self {
            id,
            kind: default.kind(),
            widget: Widget::Range,
            min: Some(bounds.0),
            max: Some(bounds.1),
            step: Some(step),
            default,
            description,
            overridable_max: false,
            enabled: true,
        }
    }

    fn overridable(mut self) -> Self {
        self.overridable_max = true;
        self
    }

    pub fn is_quality(&self) -> bool {
        self.id == QUALITY
    }

    /// Whether live hardware limits may replace this spec's bounds.
    pub fn takes_live_bounds(&self) -> bool {
        self.overridable_max || self.min.is_none() || self.max.is_none()
    }

    /// Adopt live limits when allowed. Returns true if anything changed.
    pub fn refresh_bounds(&mut self, live: LiveBounds) -> bool {
        if !self.takes_live_bounds() || live.min > live.max {
            return false;
        }
        let changed = self.min != Some(live.min) || self.max != Some(live.max);
        self.min = Some(live.min);
        self.max = Some(live.max);
        changed
    }
}

/// The fixed control table, in display order.
pub fn default_table(quality: u8, frame_duration_limits: [i64; 2]) -> Vec<ControlSpec> {
    use ControlValue::{Float, Int};

    vec![
        ControlSpec::checkbox("AeEnable", true, &["Automatic exposure and gain"]),
        ControlSpec::range(
            "AeConstraintMode",
            Int(0),
            (0.0, 3.0),
            1.0,
            &["Normal", "Highlight", "Shadows", "Custom"],
        ),
        ControlSpec::range(
            "AeExposureMode",
            Int(0),
            (0.0, 3.0),
            1.0,
            &["Normal", "Short", "Long", "Custom"],
        ),
        ControlSpec::range(
            "AeMeteringMode",
            Int(0),
            (0.0, 3.0),
            1.0,
            &["CentreWeighted", "Spot", "Matrix", "Custom"],
        ),
        ControlSpec::range(
            "NoiseReductionMode",
            Int(0),
            (0.0, 2.0),
            1.0,
            &["Off", "Fast", "HighQuality"],
        ),
        ControlSpec::checkbox("AwbEnable", true, &["Automatic white balance"]),
        ControlSpec::range(
            "AwbMode",
            Int(0),
            (0.0, 6.0),
            1.0,
            &[
                "Auto",
                "Incandescent",
                "Tungsten",
                "Fluorescent",
                "Indoor",
                "Daylight",
                "Cloudy",
            ],
        ),
        ControlSpec {
            id: FRAME_DURATION_LIMITS,
            kind: ControlKind::Tuple,
            widget: Widget::Range,
            min: None,
            max: None,
            step: Some(0.0),
            default: ControlValue::Tuple(frame_duration_limits.to_vec()),
            description: &["Minimum and maximum frame duration in microseconds"],
            overridable_max: false,
            enabled: false,
        },
        ControlSpec::range(
            "ExposureTime",
            Int(63835),
            (0.0, 200_000.0),
            1000.0,
            &["Exposure time in microseconds"],
        )
        .overridable(),
        ControlSpec::range(
            "ExposureValue",
            Float(0.0),
            (-8.0, 8.0),
            0.1,
            &["Exposure compensation in stops"],
        ),
        ControlSpec::range(
            "AnalogueGain",
            Int(8),
            (1.0, 16.0),
            1.0,
            &["Sensor analogue gain"],
        )
        .overridable(),
        ControlSpec::range(
            "Brightness",
            Float(0.0),
            (-1.0, 1.0),
            0.1,
            &["-1.0 is black, 1.0 is white"],
        ),
        ControlSpec::range(
            "Contrast",
            Float(1.0),
            (0.0, 32.0),
            0.1,
            &["1.0 is normal contrast"],
        ),
        ControlSpec::range(
            "Saturation",
            Float(1.0),
            (0.0, 32.0),
            0.1,
            &["0.0 is greyscale, 1.0 is normal"],
        ),
        ControlSpec::range(
            "Sharpness",
            Float(0.0),
            (0.0, 16.0),
            0.1,
            &["0.0 applies no sharpening"],
        ),
        ControlSpec::range(
            QUALITY,
            Int(i64::from(quality.clamp(1, 100))),
            (1.0, 100.0),
            1.0,
            &["JPEG quality of the stream; changing it restarts capture"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_defaults_fit_their_bounds() {
        for spec in default_table(75, [33333, 33333]) {
            assert_eq!(spec.default.kind(), spec.kind, "{}", spec.id);
            if let Some(v) = spec.default.as_f64() {
                assert!(spec.min.map_or(true, |min| v >= min), "{}", spec.id);
                assert!(spec.max.map_or(true, |max| v <= max), "{}", spec.id);
            }
        }
    }

    #[test]
    fn only_overridable_specs_take_live_bounds() {
        let table = default_table(75, [0, 0]);
        let mut gain = table.iter().find(|s| s.id == "AnalogueGain").cloned().unwrap();
        let mut brightness = table.iter().find(|s| s.id == "Brightness").cloned().unwrap();
        let live = LiveBounds {
            min: 1.0,
            max: 22.0,
            default: 1.0,
        };

        assert!(gain.refresh_bounds(live));
        assert_eq!(gain.max, Some(22.0));
        assert!(!brightness.refresh_bounds(live));
        assert_eq!(brightness.max, Some(1.0));
    }

    #[test]
    fn frame_duration_limits_are_hidden() {
        let table = default_table(75, [40000, 40000]);
        let fdl = table.iter().find(|s| s.id == FRAME_DURATION_LIMITS).unwrap();
        assert!(!fdl.enabled);
        assert_eq!(fdl.default, ControlValue::Tuple(vec![40000, 40000]));
    }
}
