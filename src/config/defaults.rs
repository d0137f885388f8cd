//! Built-in ElMo profile
//!
//! Knobs and faders of a generic MIDI controller on CC 1-14, channel 0, mapped
//! to the ElMo viewer's camera, surface, fog and clipping parameters.

use super::{BindingConfig, MidiSourceConfig, ProfileConfig, SourcesConfig, ThrottleConfig, TransformConfig};
use crate::engine::EngineSettings;
use crate::event::ControlKind;
use crate::mapping::{Curve, ParameterRef, Smoothing, TransformInput};

/// Backend id of the ElMo viewer
pub const ELMO_BACKEND: &str = "elmo";

/// Throttle of cheap camera and fog updates
const DEFAULT_INTERVAL_MS: u64 = 50;
/// Connolly surface recomputation
const CONNOLLY_INTERVAL_MS: u64 = 200;
/// Isosurface re-meshing
const ISOSURFACE_INTERVAL_MS: u64 = 100;

/// (name, cc, parameter, out_lo, out_hi, interval, description)
const DIALS: [(&str, u16, &str, f64, f64, u64, &str); 14] = [
    ("zoom", 1, "camera_zoom", -320.0, 100.0, DEFAULT_INTERVAL_MS, "Camera Zoom"),
    ("rotation_x", 2, "camera_rot_x", 0.0, 360.0, DEFAULT_INTERVAL_MS, "X Rotation"),
    ("rotation_y", 3, "camera_rot_y", 0.0, 360.0, DEFAULT_INTERVAL_MS, "Y Rotation"),
    ("rotation_z", 4, "camera_rot_z", 0.0, 360.0, DEFAULT_INTERVAL_MS, "Z Rotation"),
    ("translate_x", 5, "camera_trans_x", -60.0, 60.0, DEFAULT_INTERVAL_MS, "X Translation"),
    ("translate_y", 6, "camera_trans_y", -60.0, 60.0, DEFAULT_INTERVAL_MS, "Y Translation"),
    ("connolly_transparency", 7, "connolly_transparency", 0.0, 1.0, CONNOLLY_INTERVAL_MS, "Connolly Surface Transparency"),
    ("connolly_probe_radius", 8, "connolly_probe_radius", 0.5, 3.0, CONNOLLY_INTERVAL_MS, "Connolly Probe Radius"),
    ("fog_density", 9, "fog_density", 0.0, 0.3, DEFAULT_INTERVAL_MS, "Fog Density"),
    ("isosurface_level", 10, "isosurface_level", 0.01, 1.0, ISOSURFACE_INTERVAL_MS, "Isosurface Level"),
    ("fog_near", 11, "fog_near", 30.0, 100.0, DEFAULT_INTERVAL_MS, "Fog Near Distance"),
    ("fog_far", 12, "fog_far", 70.0, 200.0, DEFAULT_INTERVAL_MS, "Fog Far Distance"),
    ("clip_z", 13, "clip_z", -100.0, 100.0, DEFAULT_INTERVAL_MS, "Clipping Z Position"),
    ("clip_depth", 14, "clip_depth", 1.0, 100.0, DEFAULT_INTERVAL_MS, "Clipping Depth"),
];

/// Profile used when no file is given
pub fn default_profile() -> ProfileConfig {
    let bindings = DIALS
        .iter()
        .map(|&(name, cc, parameter, out_lo, out_hi, interval, description)| BindingConfig {
            name: name.to_string(),
            source: "midi".to_string(),
            channel: 0,
            control: cc,
            kind: ControlKind::Continuous,
            target: ParameterRef::new(ELMO_BACKEND, parameter),
            transform: TransformConfig {
                input: TransformInput::Raw,
                in_range: [0.0, 127.0],
                out_range: [out_lo, out_hi],
                invert: false,
                curve: Curve::Linear,
            },
            throttle: (interval != DEFAULT_INTERVAL_MS).then_some(ThrottleConfig {
                min_interval_ms: interval,
                smoothing: Smoothing::None,
                coalesce: true,
            }),
            enabled: true,
            description: Some(description.to_string()),
        })
        .collect();

    ProfileConfig {
        engine: EngineSettings::default(),
        sources: SourcesConfig {
            midi: vec![MidiSourceConfig {
                id: "midi".to_string(),
                port: String::new(),
            }],
            osc: Vec::new(),
            gamepad: None,
        },
        bindings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ControlIdentity;
    use std::time::Duration;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = default_profile();
        let table = profile.to_table().unwrap();

        assert_eq!(table.len(), 14);
        assert_eq!(profile.backend_ids(), vec![ELMO_BACKEND]);
    }

    #[test]
    fn test_expensive_controls_are_throttled_harder() {
        let table = default_profile().to_table().unwrap();
        let interval = |cc| {
            table
                .get(&ControlIdentity::continuous("midi", 0, cc))
                .unwrap()
                .throttle
                .min_interval
        };

        assert_eq!(interval(1), Duration::from_millis(50));
        assert_eq!(interval(7), Duration::from_millis(200));
        assert_eq!(interval(8), Duration::from_millis(200));
        assert_eq!(interval(10), Duration::from_millis(100));
    }

    #[test]
    fn test_zoom_dial_range() {
        let table = default_profile().to_table().unwrap();
        let zoom = table.get(&ControlIdentity::continuous("midi", 0, 1)).unwrap();

        assert_eq!(zoom.transform.apply(0.0), -320.0);
        assert_eq!(zoom.transform.apply(127.0), 100.0);
    }

    #[test]
    fn test_default_profile_survives_yaml() {
        let profile = default_profile();
        let yaml = serde_yaml::to_string(&profile).unwrap();
        assert_eq!(ProfileConfig::parse(&yaml).unwrap(), profile);
    }
}
