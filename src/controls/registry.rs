//! Process-wide table of control values
//!
//! Readers get a lock-free snapshot. Writers go through [`RegistryGuard`],
//! which holds the single configuration lock: at most one control update,
//! mode change or capture (re)start is in flight at a time.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::ser::{Serialize, SerializeMap, Serializer};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use super::spec::{default_table, ControlSpec, Widget, QUALITY};
use super::value::{coerce, CoercionError, ControlKind, ControlValue, RequestedValue};
use crate::capture::{ApplyReport, CaptureSession, LiveBounds};
use crate::error::Result;

/// Identifier → requested value, as sent by clients and mode presets
pub type ControlUpdate = BTreeMap<String, RequestedValue>;

#[derive(Debug, Clone)]
pub struct ControlEntry {
    pub spec: ControlSpec,
    pub value: ControlValue,
}

/// Specs and their current values, in display order
#[derive(Debug, Clone)]
pub struct ControlTable {
    entries: Vec<ControlEntry>,
}

impl ControlTable {
    pub fn new(specs: Vec<ControlSpec>) -> Self {
        let entries = specs
            .into_iter()
            .map(|spec| ControlEntry {
                value: spec.default.clone(),
                spec,
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&ControlEntry> {
        self.entries.iter().find(|e| e.spec.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ControlEntry> {
        self.entries.iter_mut().find(|e| e.spec.id == id)
    }

    pub fn value(&self, id: &str) -> Option<&ControlValue> {
        self.get(id).map(|e| &e.value)
    }

    /// Current stream quality.
    pub fn quality(&self) -> u8 {
        match self.value(QUALITY) {
            Some(ControlValue::Int(q)) => (*q).clamp(1, 100) as u8,
            _ => 75,
        }
    }

    /// Every value the camera itself understands (quality excluded).
    pub fn camera_values(&self) -> Vec<(String, ControlValue)> {
        self.entries
            .iter()
            .filter(|e| !e.spec.is_quality())
            .map(|e| (e.spec.id.to_string(), e.value.clone()))
            .collect()
    }

    /// Display view of every enabled control.
    pub fn meta(&self) -> Meta {
        Meta(
            self.entries
                .iter()
                .filter(|e| e.spec.enabled)
                .map(|e| {
                    (
                        e.spec.id,
                        ControlMeta {
                            value: e.value.clone(),
                            control_type: e.spec.widget,
                            kind: e.spec.kind,
                            min: e.spec.min,
                            max: e.spec.max,
                            step: e.spec.step,
                            description: e.spec.description,
                        },
                    )
                })
                .collect(),
        )
    }
}

/// One control as reported by `/meta`
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ControlMeta {
    pub value: ControlValue,
    #[serde(rename = "controlType")]
    pub control_type: Widget,
    #[serde(rename = "type")]
    pub kind: ControlKind,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub step: Option<f64>,
    pub description: &'static [&'static str],
}

/// Ordered map of control id → [`ControlMeta`]
#[derive(Debug, Clone, PartialEq)]
pub struct Meta(pub Vec<(&'static str, ControlMeta)>);

impl Meta {
    pub fn get(&self, id: &str) -> Option<&ControlMeta> {
        self.0.iter().find(|(k, _)| *k == id).map(|(_, m)| m)
    }
}

impl Serialize for Meta {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (id, meta) in &self.0 {
            map.serialize_entry(id, meta)?;
        }
        map.end()
    }
}

/// What an update did, key by key
#[derive(Debug, Default, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub changed: Vec<String>,
    pub skipped: Vec<String>,
    pub restarted: bool,
    pub camera: ApplyReport,
}

pub struct ControlRegistry {
    session: Arc<CaptureSession>,
    table: Mutex<ControlTable>,
    snapshot: ArcSwap<ControlTable>,
}

impl ControlRegistry {
    /// Registry over the fixed control table, seeded from the session's
    /// configured quality and frame rate.
    pub fn new(session: Arc<CaptureSession>) -> Self {
        let config = session.config();
        let table = ControlTable::new(default_table(
            config.quality,
            config.frame_duration_limits(),
        ));
        Self::with_table(session, table)
    }

    pub fn with_table(session: Arc<CaptureSession>, table: ControlTable) -> Self {
        Self {
            session,
            snapshot: ArcSwap::from_pointee(table.clone()),
            table: Mutex::new(table),
        }
    }

    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    /// Every enabled control with its value and display metadata.
    pub fn get_all(&self) -> Meta {
        self.snapshot.load().meta()
    }

    /// Take the configuration lock.
    pub async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            registry: self,
            table: self.table.lock().await,
        }
    }

    pub async fn update(&self, partial: &ControlUpdate) -> Result<UpdateOutcome> {
        self.lock().await.update(partial).await
    }

    pub async fn reset_to_defaults(&self) -> Result<ApplyReport> {
        self.lock().await.reset_to_defaults().await
    }

    /// Start capture if nothing is running, using the registry's quality.
    pub async fn ensure_capture(&self) -> Result<bool> {
        let mut guard = self.lock().await;
        let started = guard.start_if_stopped().await?;
        if started {
            guard.push_to_camera().await?;
        }
        Ok(started)
    }

    /// Startup sequence: start capture, adopt live bounds, assert every control.
    pub async fn initialize(&self) -> Result<ApplyReport> {
        let mut guard = self.lock().await;
        guard.start_if_stopped().await?;
        guard.refresh_bounds().await?;
        guard.push_to_camera().await
    }
}

/// Exclusive access to the table and to capture reconfiguration
pub struct RegistryGuard<'a> {
    registry: &'a ControlRegistry,
    table: MutexGuard<'a, ControlTable>,
}

impl RegistryGuard<'_> {
    /// Apply the keys present in `partial`, then re-assert the full control set.
    ///
    /// A key that cannot be resolved is logged and left unchanged; a quality
    /// change restarts capture and is never sent to the camera as a control.
    pub async fn update(&mut self, partial: &ControlUpdate) -> Result<UpdateOutcome> {
        let mut outcome = UpdateOutcome::default();
        let previous_quality = self.table.quality();
        let mut new_quality = None;

        for (id, requested) in partial {
            let live = self.live_bounds(id).await?;
            let Some(entry) = self.table.get_mut(id) else {
                warn!(control = %id, "Unknown control");
                outcome.skipped.push(id.clone());
                continue;
            };

            match resolve(&entry.spec, requested, live) {
                Ok(value) => {
                    debug!(control = %id, value = ?value, "Control updated");
                    if entry.spec.is_quality() {
                        if let Some(q) = value.as_f64() {
                            new_quality = Some(q as u8);
                        }
                    }
                    entry.value = value;
                    outcome.changed.push(id.clone());
                }
                Err(e) => {
                    warn!(control = %id, requested = ?requested, "Ignoring control: {}", e);
                    outcome.skipped.push(id.clone());
                }
            }
        }

        if let Some(quality) = new_quality {
            if let Err(e) = self.restart(quality).await? {
                error!(quality, "Capture restart failed: {}", e);
                self.set_quality(previous_quality);
                outcome.changed.retain(|id| id != QUALITY);
                outcome.skipped.push(QUALITY.to_string());

                if let Err(e) = self.restart(previous_quality).await? {
                    error!(quality = previous_quality, "Capture could not be restored: {}", e);
                    self.publish();
                    return Err(e);
                }
            } else {
                outcome.restarted = true;
            }
        }

        outcome.camera = self.push_to_camera().await?;
        self.publish();
        Ok(outcome)
    }

    /// Pull hardware defaults for every camera control and make them current.
    /// Controls without live data fall back to their table defaults.
    pub async fn reset_to_defaults(&mut self) -> Result<ApplyReport> {
        let live = self.all_live_bounds().await?;

        for entry in self.table.entries.iter_mut() {
            if entry.spec.is_quality() || !entry.spec.enabled {
                continue;
            }
            entry.value = match live.get(entry.spec.id) {
                Some(bounds) => {
                    entry.spec.refresh_bounds(*bounds);
                    ControlValue::from_f64(entry.spec.kind, bounds.default)
                        .map(|v| v.clamp(entry.spec.min, entry.spec.max))
                        .unwrap_or_else(|_| entry.spec.default.clone())
                }
                None => entry.spec.default.clone(),
            };
        }

        info!("Controls reset to defaults");
        let report = self.push_to_camera().await?;
        self.publish();
        Ok(report)
    }

    /// Adopt the camera's own limits for controls that accept them.
    pub async fn refresh_bounds(&mut self) -> Result<()> {
        let live = self.all_live_bounds().await?;

        for entry in self.table.entries.iter_mut() {
            if let Some(bounds) = live.get(entry.spec.id) {
                if entry.spec.refresh_bounds(*bounds) {
                    info!(
                        control = entry.spec.id,
                        "Live bounds [{}, {}]", bounds.min, bounds.max
                    );
                    entry.value = entry.value.clone().clamp(entry.spec.min, entry.spec.max);
                }
            }
        }

        self.publish();
        Ok(())
    }

    /// Start capture with the table's quality unless it is already running.
    pub async fn start_if_stopped(&mut self) -> Result<bool> {
        let session = Arc::clone(&self.registry.session);
        if session.is_running() {
            return Ok(false);
        }

        let quality = self.table.quality();
        tokio::task::spawn_blocking(move || session.start(session.config().with_quality(quality)))
            .await??;
        Ok(true)
    }

    /// Forward the full current value set to the camera.
    pub async fn push_to_camera(&mut self) -> Result<ApplyReport> {
        let session = Arc::clone(&self.registry.session);
        let values = self.table.camera_values();
        Ok(tokio::task::spawn_blocking(move || session.apply_controls(&values)).await?)
    }

    /// Outer error: the blocking task itself failed. Inner: the restart did.
    async fn restart(&mut self, quality: u8) -> Result<Result<()>> {
        let session = Arc::clone(&self.registry.session);
        Ok(tokio::task::spawn_blocking(move || session.restart_with_quality(quality)).await?)
    }

    fn set_quality(&mut self, quality: u8) {
        if let Some(entry) = self.table.get_mut(QUALITY) {
            entry.value = ControlValue::Int(i64::from(quality));
        }
    }

    async fn live_bounds(&self, id: &str) -> Result<Option<LiveBounds>> {
        let session = Arc::clone(&self.registry.session);
        let id = id.to_string();
        let bounds = tokio::task::spawn_blocking(move || {
            session.read_live_bounds([id.as_str()]).remove(&id)
        })
        .await?;
        Ok(bounds)
    }

    async fn all_live_bounds(&self) -> Result<HashMap<String, LiveBounds>> {
        let session = Arc::clone(&self.registry.session);
        let ids: Vec<&'static str> = self.table.entries.iter().map(|e| e.spec.id).collect();
        Ok(tokio::task::spawn_blocking(move || session.read_live_bounds(ids)).await?)
    }

    fn publish(&self) {
        self.registry.snapshot.store(Arc::new(self.table.clone()));
    }
}

/// Turn a requested value into a typed, in-bounds value for `spec`.
pub fn resolve(
    spec: &ControlSpec,
    requested: &RequestedValue,
    live: Option<LiveBounds>,
) -> std::result::Result<ControlValue, CoercionError> {
    let value = match requested {
        RequestedValue::Maximum => {
            let max = live
                .map(|b| b.max)
                .or(spec.max)
                .ok_or(CoercionError::NoMaximum)?;
            ControlValue::from_f64(spec.kind, max)?
        }
        RequestedValue::Literal(raw) => coerce(spec.kind, raw)?,
    };
    Ok(value.clamp(spec.min, spec.max))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(id: &str) -> ControlSpec {
        default_table(75, [0, 0])
            .into_iter()
            .find(|s| s.id == id)
            .unwrap()
    }

    #[test]
    fn maximum_prefers_live_bound_and_floors() {
        let gain = spec("AnalogueGain");
        let live = LiveBounds {
            min: 1.0,
            max: 15.99,
            default: 1.0,
        };
        assert_eq!(
            resolve(&gain, &RequestedValue::Maximum, Some(live)),
            Ok(ControlValue::Int(15))
        );
        assert_eq!(
            resolve(&gain, &RequestedValue::Maximum, None),
            Ok(ControlValue::Int(16))
        );
    }

    #[test]
    fn maximum_without_any_bound_fails() {
        let fdl = spec("FrameDurationLimits");
        assert_eq!(
            resolve(&fdl, &RequestedValue::Maximum, None),
            Err(CoercionError::NoMaximum)
        );
    }

    #[test]
    fn literal_is_coerced_and_clamped() {
        let brightness = spec("Brightness");
        assert_eq!(
            resolve(&brightness, &RequestedValue::Literal(json!("4")), None),
            Ok(ControlValue::Float(1.0))
        );
    }

    #[test]
    fn meta_omits_disabled_controls() {
        let table = ControlTable::new(default_table(75, [0, 0]));
        let meta = table.meta();
        assert!(meta.get("FrameDurationLimits").is_none());
        assert_eq!(meta.get("Quality").unwrap().value, ControlValue::Int(75));

        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["AeEnable"]["controlType"], json!("checkbox"));
        assert_eq!(json["ExposureTime"]["type"], json!("int"));
        assert_eq!(json["ExposureTime"]["step"], json!(1000.0));
    }

    #[test]
    fn camera_values_exclude_quality() {
        let table = ControlTable::new(default_table(40, [0, 0]));
        assert_eq!(table.quality(), 40);
        let values = table.camera_values();
        assert!(values.iter().all(|(id, _)| id != QUALITY));
        assert!(values.iter().any(|(id, _)| id == "FrameDurationLimits"));
    }
}
