//! Persisted trigger states.
//!
//! The current trigger level of every station is kept in a JSON file keyed
//! by `<user>/<station>`, rewritten atomically on every change and reloaded
//! at startup, so downstream consumers see the last known states across
//! restarts.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{info, warn};

use cluster_core::pipeline::Sink;
use cluster_core::{DetectorTrigger, TriggerLevel};

pub struct TriggerFileSink {
    path: PathBuf,
    states: Mutex<BTreeMap<String, TriggerLevel>>,
}

impl TriggerFileSink {
    pub fn new(path: PathBuf) -> Self {
        let states = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(states) => {
                    let states: BTreeMap<String, TriggerLevel> = states;
                    info!(entries = states.len(), "trigger states restored");
                    states
                }
                Err(e) => {
                    warn!("trigger save file unreadable, starting empty: {e}");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            states: Mutex::new(states),
        }
    }

    pub fn states(&self) -> BTreeMap<String, TriggerLevel> {
        self.states.lock().unwrap().clone()
    }

    fn rewrite(&self, states: &BTreeMap<String, TriggerLevel>) {
        let json = match serde_json::to_vec_pretty(states) {
            Ok(json) => json,
            Err(e) => {
                warn!("could not serialize trigger states: {e}");
                return;
            }
        };
        let tmp = self.path.with_extension("json.tmp");
        let result = std::fs::write(&tmp, json).and_then(|()| std::fs::rename(&tmp, &self.path));
        if let Err(e) = result {
            // The previous file stays in place; retried on the next change.
            warn!(path = %self.path.display(), "could not write trigger save file: {e}");
        }
    }
}

impl Sink<DetectorTrigger> for TriggerFileSink {
    fn submit(&self, trigger: DetectorTrigger) {
        let mut states = self.states.lock().unwrap();
        let previous = states.insert(trigger.user.topic_suffix(), trigger.level);
        if previous != Some(trigger.level) {
            self.rewrite(&states);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_core::UserInfo;
    use tempfile::TempDir;

    fn trigger(name: &str, level: TriggerLevel) -> DetectorTrigger {
        DetectorTrigger {
            user: UserInfo::new(name, "01"),
            level,
        }
    }

    #[test]
    fn test_states_survive_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trigger.json");

        let sink = TriggerFileSink::new(path.clone());
        sink.submit(trigger("alice", TriggerLevel::Online));
        sink.submit(trigger("bob", TriggerLevel::Reliable));
        sink.submit(trigger("alice", TriggerLevel::Offline));

        let restored = TriggerFileSink::new(path);
        let states = restored.states();
        assert_eq!(states.get("alice/01"), Some(&TriggerLevel::Offline));
        assert_eq!(states.get("bob/01"), Some(&TriggerLevel::Reliable));
    }

    #[test]
    fn test_file_content_is_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trigger.json");

        let sink = TriggerFileSink::new(path.clone());
        sink.submit(trigger("alice", TriggerLevel::Unreliable));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"alice/01\""));
        assert!(raw.contains("\"unreliable\""));
    }

    #[test]
    fn test_unchanged_level_does_not_rewrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trigger.json");

        let sink = TriggerFileSink::new(path.clone());
        sink.submit(trigger("alice", TriggerLevel::Online));
        let first_write = std::fs::metadata(&path).unwrap().modified().unwrap();

        std::fs::remove_file(&path).unwrap();
        sink.submit(trigger("alice", TriggerLevel::Online));
        // No state change: the file is not recreated.
        assert!(std::fs::metadata(&path).is_err());
        let _ = first_write;
    }
}
