//! Mapping profiles
//!
//! A profile is a YAML file holding the engine settings, the event sources to
//! open and the binding list. It is loaded at startup and hot-reloaded by
//! [`ProfileWatcher`].

pub mod defaults;
pub mod watcher;

use crate::engine::EngineSettings;
use crate::event::{ControlIdentity, ControlKind};
use crate::mapping::{Binding, Curve, MappingTable, ParameterRef, Smoothing, ThrottlePolicy, Transform, TransformInput};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::fs;

pub use defaults::default_profile;
pub use watcher::ProfileWatcher;

/// Root of a profile file
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ProfileConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub bindings: Vec<BindingConfig>,
}

/// Event sources opened by the binary
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SourcesConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub midi: Vec<MidiSourceConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub osc: Vec<OscSourceConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gamepad: Option<GamepadSourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MidiSourceConfig {
    pub id: String,
    /// Case-insensitive substring of the port name; empty picks the first port
    #[serde(default)]
    pub port: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OscSourceConfig {
    pub id: String,
    /// UDP listen address, e.g. "0.0.0.0:9000"
    pub bind: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GamepadSourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_gamepad_id")]
    pub id: String,
    #[serde(default = "default_deadzone")]
    pub deadzone: f32,
}

/// One binding as written in a profile
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BindingConfig {
    pub name: String,
    pub source: String,
    #[serde(default)]
    pub channel: u8,
    pub control: u16,
    #[serde(default = "default_kind")]
    pub kind: ControlKind,
    pub target: ParameterRef,
    #[serde(default)]
    pub transform: TransformConfig,
    /// Defaults depend on `kind` when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<ThrottleConfig>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct TransformConfig {
    #[serde(default)]
    pub input: TransformInput,
    #[serde(rename = "in", default = "unit_range")]
    pub in_range: [f64; 2],
    #[serde(rename = "out", default = "unit_range")]
    pub out_range: [f64; 2],
    #[serde(default)]
    pub invert: bool,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub curve: Curve,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Transform::default().into()
    }
}

impl From<Transform> for TransformConfig {
    fn from(t: Transform) -> Self {
        Self {
            input: t.input,
            in_range: [t.in_lo, t.in_hi],
            out_range: [t.out_lo, t.out_hi],
            invert: t.invert,
            curve: t.curve,
        }
    }
}

impl From<TransformConfig> for Transform {
    fn from(c: TransformConfig) -> Self {
        Transform {
            input: c.input,
            in_lo: c.in_range[0],
            in_hi: c.in_range[1],
            out_lo: c.out_range[0],
            out_hi: c.out_range[1],
            invert: c.invert,
            curve: c.curve,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct ThrottleConfig {
    pub min_interval_ms: u64,
    #[serde(default, with = "serde_yaml::with::singleton_map")]
    pub smoothing: Smoothing,
    #[serde(default = "default_true")]
    pub coalesce: bool,
}

impl From<ThrottlePolicy> for ThrottleConfig {
    fn from(p: ThrottlePolicy) -> Self {
        Self {
            min_interval_ms: p.min_interval.as_millis() as u64,
            smoothing: p.smoothing,
            coalesce: p.coalesce,
        }
    }
}

impl From<ThrottleConfig> for ThrottlePolicy {
    fn from(c: ThrottleConfig) -> Self {
        ThrottlePolicy {
            min_interval: Duration::from_millis(c.min_interval_ms),
            smoothing: c.smoothing,
            coalesce: c.coalesce,
        }
    }
}

impl BindingConfig {
    pub fn identity(&self) -> ControlIdentity {
        ControlIdentity::new(self.source.clone(), self.channel, self.control, self.kind)
    }

    /// Build the runtime binding
    pub fn to_binding(&self) -> Binding {
        let throttle = self
            .throttle
            .map(ThrottlePolicy::from)
            .unwrap_or_else(|| ThrottlePolicy::for_kind(self.kind));

        let mut binding = Binding::new(self.identity(), self.target.clone())
            .with_transform(self.transform.into())
            .with_throttle(throttle);
        binding.enabled = self.enabled;
        binding.description = self.description.clone();
        binding
    }

    /// Saver form of a runtime binding
    pub fn from_binding(binding: &Binding) -> Self {
        let default_throttle = ThrottlePolicy::for_kind(binding.identity.kind);
        Self {
            name: binding.target.parameter.clone(),
            source: binding.identity.source_id.clone(),
            channel: binding.identity.channel,
            control: binding.identity.control_number,
            kind: binding.identity.kind,
            target: binding.target.clone(),
            transform: binding.transform.into(),
            throttle: (binding.throttle != default_throttle).then(|| binding.throttle.into()),
            enabled: binding.enabled,
            description: binding.description.clone(),
        }
    }
}

impl ProfileConfig {
    /// Load and validate a profile
    pub async fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read profile: {}", path))?;

        Self::parse(&contents).with_context(|| format!("Invalid profile: {}", path))
    }

    /// Parse and validate profile YAML
    pub fn parse(contents: &str) -> Result<Self> {
        let profile: ProfileConfig =
            serde_yaml::from_str(contents).context("Failed to parse YAML profile")?;
        profile.to_table()?;
        Ok(profile)
    }

    pub async fn save(&self, path: &str) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize profile to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write profile: {}", path))?;

        Ok(())
    }

    /// Validate the bindings and build a mapping table
    pub fn to_table(&self) -> Result<MappingTable> {
        let mut bindings = Vec::with_capacity(self.bindings.len());
        for config in &self.bindings {
            let binding = config.to_binding();
            binding
                .validate()
                .with_context(|| format!("Invalid binding '{}'", config.name))?;
            bindings.push(binding);
        }
        Ok(MappingTable::from_bindings(bindings)?)
    }

    /// Same profile with its bindings replaced by a runtime snapshot
    pub fn with_bindings(&self, bindings: &[Binding]) -> Self {
        Self {
            engine: self.engine.clone(),
            sources: self.sources.clone(),
            bindings: bindings.iter().map(BindingConfig::from_binding).collect(),
        }
    }

    /// Backend ids referenced by the bindings, sorted
    pub fn backend_ids(&self) -> Vec<String> {
        self.bindings
            .iter()
            .map(|b| b.target.backend_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn default_true() -> bool { true }
fn default_kind() -> ControlKind { ControlKind::Continuous }
fn default_gamepad_id() -> String { "gamepad".to_string() }
fn default_deadzone() -> f32 { 0.1 }
fn unit_range() -> [f64; 2] { [0.0, 1.0] }

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MappingError;
    use tempfile::TempDir;

    const PROFILE: &str = r#"
engine:
  send_timeout_ms: 100
sources:
  midi:
    - id: midi
      port: nanoKONTROL
  osc:
    - id: osc
      bind: "127.0.0.1:9000"
bindings:
  - name: zoom
    source: midi
    control: 1
    target: { backend: elmo, parameter: camera_zoom }
    transform:
      input: raw
      in: [0, 127]
      out: [-320, 100]
    description: Camera Zoom
  - name: fog
    source: midi
    control: 9
    target: { backend: elmo, parameter: fog_density }
    transform:
      out: [0.0, 0.3]
      curve: { exponential: 2.0 }
    throttle:
      min_interval_ms: 20
      smoothing: { ema: { alpha: 0.5 } }
  - name: reset
    source: midi
    control: 60
    kind: discrete
    target: { backend: pymol, parameter: reset_view }
    enabled: false
"#;

    #[test]
    fn test_parse_profile() {
        let profile = ProfileConfig::parse(PROFILE).unwrap();

        assert_eq!(profile.engine.send_timeout_ms, 100);
        assert_eq!(profile.engine.queue_capacity, EngineSettings::default().queue_capacity);
        assert_eq!(profile.sources.midi[0].port, "nanoKONTROL");
        assert_eq!(profile.sources.osc[0].bind, "127.0.0.1:9000");
        assert!(profile.sources.gamepad.is_none());
        assert_eq!(profile.backend_ids(), vec!["elmo", "pymol"]);
    }

    #[test]
    fn test_to_table_applies_defaults() {
        let table = ProfileConfig::parse(PROFILE).unwrap().to_table().unwrap();
        assert_eq!(table.len(), 3);

        let zoom = table.get(&ControlIdentity::continuous("midi", 0, 1)).unwrap();
        assert_eq!(zoom.throttle, ThrottlePolicy::continuous_default());
        assert_eq!(zoom.transform.input, TransformInput::Raw);
        assert_eq!(zoom.transform.apply(127.0), 100.0);
        assert_eq!(zoom.description.as_deref(), Some("Camera Zoom"));

        let fog = table.get(&ControlIdentity::continuous("midi", 0, 9)).unwrap();
        assert_eq!(fog.throttle.min_interval, Duration::from_millis(20));
        assert_eq!(fog.throttle.smoothing, Smoothing::Ema { alpha: 0.5 });
        assert_eq!(fog.transform.curve, Curve::Exponential(2.0));

        let reset = table.get(&ControlIdentity::discrete("midi", 0, 60)).unwrap();
        assert!(!reset.enabled);
        assert_eq!(reset.throttle, ThrottlePolicy::discrete_default());
    }

    #[test]
    fn test_duplicate_identity_is_rejected() {
        let mut profile = ProfileConfig::parse(PROFILE).unwrap();
        let mut copy = profile.bindings[0].clone();
        copy.name = "zoom2".into();
        profile.bindings.push(copy);

        let err = profile.to_table().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MappingError>(),
            Some(MappingError::DuplicateIdentity(_))
        ));
    }

    #[test]
    fn test_invalid_binding_is_rejected() {
        let bad = r#"
bindings:
  - name: broken
    source: midi
    control: 1
    target: { backend: elmo, parameter: fog }
    transform:
      in: [1.0, 1.0]
"#;
        let err = ProfileConfig::parse(bad).unwrap_err();
        assert!(format!("{:#}", err).contains("broken"));

        let bad_alpha = r#"
bindings:
  - name: jittery
    source: midi
    control: 1
    target: { backend: elmo, parameter: fog }
    throttle: { min_interval_ms: 10, smoothing: { ema: { alpha: 1.5 } } }
"#;
        assert!(ProfileConfig::parse(bad_alpha).is_err());
    }

    #[test]
    fn test_with_bindings_round_trips_runtime_table() {
        let profile = ProfileConfig::parse(PROFILE).unwrap();
        let bindings = profile.to_table().unwrap().bindings();

        let saved = profile.with_bindings(&bindings);
        let rebuilt = saved.to_table().unwrap().bindings();
        assert_eq!(rebuilt, bindings);

        // Default throttles are left implicit
        let zoom = saved.bindings.iter().find(|b| b.control == 1).unwrap();
        assert!(zoom.throttle.is_none());
    }

    #[test]
    fn test_curve_and_smoothing_use_map_form() {
        let binding = Binding::new(ControlIdentity::continuous("midi", 0, 3), ParameterRef::new("elmo", "clip_z"))
            .with_transform(Transform::linear(-100.0, 100.0).with_curve(Curve::Logarithmic(3.0)))
            .with_throttle(ThrottlePolicy {
                min_interval: Duration::from_millis(30),
                smoothing: Smoothing::Ema { alpha: 0.25 },
                coalesce: true,
            });
        let profile = ProfileConfig::default().with_bindings(&[binding.clone()]);

        let yaml = serde_yaml::to_string(&profile).unwrap();
        assert!(yaml.contains("logarithmic: 3.0"), "{}", yaml);
        assert!(yaml.contains("alpha: 0.25"), "{}", yaml);
        assert!(!yaml.contains('!'), "{}", yaml);

        let parsed = ProfileConfig::parse(&yaml).unwrap();
        assert_eq!(parsed.to_table().unwrap().bindings(), vec![binding]);
    }

    #[test]
    fn test_sub_millisecond_throttle_is_not_saved() {
        let mut binding = Binding::new(ControlIdentity::continuous("midi", 0, 3), ParameterRef::new("elmo", "clip_z"));
        binding.throttle.min_interval = Duration::from_micros(500);

        let profile = ProfileConfig::default().with_bindings(&[binding]);
        assert!(profile.to_table().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("profile.yaml");
        let path = path.to_string_lossy().to_string();

        let profile = ProfileConfig::parse(PROFILE).unwrap();
        profile.save(&path).await.unwrap();

        let loaded = ProfileConfig::load(&path).await.unwrap();
        assert_eq!(loaded, profile);
    }

    #[tokio::test]
    async fn test_missing_file_has_context() {
        let err = ProfileConfig::load("/nonexistent/profile.yaml").await.unwrap_err();
        assert!(err.to_string().contains("/nonexistent/profile.yaml"));
    }
}
