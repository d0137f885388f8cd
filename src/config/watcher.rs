//! Profile file watcher for hot-reload support

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::ProfileConfig;
use crate::engine::EngineHandle;

/// Delay before re-reading a modified file, so writes can complete
const DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches a profile file and yields every valid new version
pub struct ProfileWatcher {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<ProfileConfig>,
}

impl ProfileWatcher {
    /// Load the profile and start watching it
    pub async fn new(path: String) -> Result<(Self, ProfileConfig)> {
        let (tx, rx) = mpsc::channel(10);

        let initial = ProfileConfig::load(&path)
            .await
            .context("Failed to load initial profile")?;

        let watched_path = path.clone();

        // notify callbacks run on their own OS thread
        let runtime_handle = tokio::runtime::Handle::current();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Modify(_)) {
                        debug!("Profile modified: {:?}", event.paths);

                        let path = watched_path.clone();
                        let tx = tx.clone();

                        runtime_handle.spawn(async move {
                            tokio::time::sleep(DEBOUNCE).await;

                            match ProfileConfig::load(&path).await {
                                Ok(profile) => {
                                    info!("Profile reloaded ({} bindings)", profile.bindings.len());
                                    if let Err(e) = tx.send(profile).await {
                                        error!("Failed to send profile update: {}", e);
                                    }
                                }
                                Err(e) => {
                                    warn!("Failed to reload profile (keeping current bindings): {:#}", e);
                                }
                            }
                        });
                    }
                }
                Err(e) => {
                    error!("Watch error: {}", e);
                }
            }
        })?;

        watcher
            .watch(Path::new(&path), RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch profile: {}", path))?;

        info!("Profile watcher started for: {}", path);

        Ok((Self { _watcher: watcher, rx }, initial))
    }

    /// Wait for the next valid profile
    ///
    /// Returns None if the watcher has been closed.
    pub async fn next_profile(&mut self) -> Option<ProfileConfig> {
        self.rx.recv().await
    }

    /// Apply every reload to the engine's mapping table until the engine stops
    ///
    /// Engine settings and sources are read at startup only.
    pub async fn apply_to(mut self, engine: EngineHandle) {
        while let Some(profile) = self.next_profile().await {
            if !engine.is_running() {
                break;
            }
            match profile.to_table() {
                Ok(table) => {
                    let count = table.len();
                    engine.replace_table(table);
                    info!("Mapping table replaced ({} bindings)", count);
                }
                Err(e) => warn!("Reloaded profile rejected: {:#}", e),
            }
        }
        debug!("Profile watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const INITIAL: &str = r#"
bindings:
  - name: fog
    source: midi
    control: 9
    target: { backend: elmo, parameter: fog_density }
"#;

    const MODIFIED: &str = r#"
bindings:
  - name: fog
    source: midi
    control: 9
    target: { backend: elmo, parameter: fog_near }
  - name: zoom
    source: midi
    control: 1
    target: { backend: elmo, parameter: camera_zoom }
"#;

    #[tokio::test]
    async fn test_profile_watcher_reloads() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("profile.yaml");
        fs::write(&path, INITIAL)?;

        let (mut watcher, profile) = ProfileWatcher::new(path.to_string_lossy().to_string()).await?;
        assert_eq!(profile.bindings[0].target.parameter, "fog_density");

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, MODIFIED)?;

        let reloaded = tokio::time::timeout(Duration::from_secs(2), watcher.next_profile())
            .await?
            .expect("watcher closed before delivering the reload");

        assert_eq!(reloaded.bindings.len(), 2);
        assert_eq!(reloaded.bindings[0].target.parameter, "fog_near");

        Ok(())
    }

    const KNOBS: &str = r#"
bindings:
  - name: fog
    source: midi
    control: 9
    target: { backend: elmo, parameter: fog_density }
    transform: { input: raw, in: [0, 127], out: [0.0, 1.0] }
    throttle: { min_interval_ms: 1500 }
  - name: zoom
    source: midi
    control: 1
    target: { backend: elmo, parameter: camera_zoom }
"#;

    const KNOBS_EDITED: &str = r#"
bindings:
  - name: fog
    source: midi
    control: 9
    target: { backend: elmo, parameter: fog_density }
    transform: { input: raw, in: [0, 127], out: [0.0, 1.0] }
    throttle: { min_interval_ms: 1500 }
  - name: zoom
    source: midi
    control: 1
    target: { backend: elmo, parameter: camera_distance }
"#;

    #[tokio::test]
    async fn test_reload_into_engine_keeps_pending_value() -> Result<()> {
        use crate::adapter::recording::RecordingAdapter;
        use crate::adapter::AdapterRegistry;
        use crate::engine::Engine;
        use crate::event::{ControlEvent, ControlIdentity, ParamValue};
        use std::sync::Arc;
        use tokio::time::Instant;

        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("profile.yaml");
        fs::write(&path, KNOBS)?;

        let (watcher, profile) = ProfileWatcher::new(path.to_string_lossy().to_string()).await?;

        let adapters = AdapterRegistry::new();
        let recording = Arc::new(RecordingAdapter::new("elmo"));
        adapters.register(recording.clone()).await?;
        let (engine, _telemetry) = Engine::start(profile.engine.clone(), profile.to_table()?, adapters);
        tokio::spawn(watcher.apply_to(engine.clone()));

        let fog = ControlIdentity::continuous("midi", 0, 9);
        let event = |raw: u8| ControlEvent::continuous(fog.clone(), raw as f64, raw as f64 / 127.0, Instant::now()).unwrap();
        engine.submit(event(0)).await?;
        engine.submit(event(127)).await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, KNOBS_EDITED)?;

        let reload_deadline = Instant::now() + Duration::from_secs(2);
        while engine.get_bindings().iter().all(|b| b.target.parameter != "camera_distance") {
            assert!(Instant::now() < reload_deadline, "profile was not reloaded");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recording.values(), vec![ParamValue::Float(0.0)]);

        let flush_deadline = Instant::now() + Duration::from_secs(3);
        while recording.values().len() < 2 {
            assert!(Instant::now() < flush_deadline, "pending value was not flushed");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(recording.values(), vec![ParamValue::Float(0.0), ParamValue::Float(1.0)]);

        engine.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_profile_is_not_delivered() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("profile.yaml");
        fs::write(&path, INITIAL)?;

        let (mut watcher, _) = ProfileWatcher::new(path.to_string_lossy().to_string()).await?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        fs::write(&path, "bindings: [ {name: broken")?;

        let reloaded = tokio::time::timeout(Duration::from_millis(500), watcher.next_profile()).await;
        assert!(reloaded.is_err(), "broken profile must not be delivered");

        Ok(())
    }
}
