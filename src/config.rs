use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};

/// Safety-cap settings consumed by the daily limit guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitSettings {
    /// Hours a worker may log per calendar day before the warning opens.
    pub daily_limit_hours: f64,
    /// Countdown window between the warning opening and the forced stop.
    pub warning_window_minutes: i64,
    /// Guard evaluation cadence.
    pub poll_interval_secs: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            daily_limit_hours: 8.0,
            warning_window_minutes: 15,
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingSettings {
    /// Labor cost per hour used by the report rollups.
    pub hourly_rate: f64,
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self { hourly_rate: 22.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct OpsSettings {
    #[serde(default)]
    limits: LimitSettings,
    #[serde(default)]
    billing: BillingSettings,
}

/// File-backed settings store. Values are read on every use by the guard
/// and reports, so `reload` takes effect without restarting anything.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<OpsSettings>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            OpsSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn limits(&self) -> LimitSettings {
        self.data.read().unwrap().limits.clone()
    }

    pub fn billing(&self) -> BillingSettings {
        self.data.read().unwrap().billing.clone()
    }

    pub fn update_limits(&self, limits: LimitSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.limits = limits;
        self.persist(&guard)
    }

    pub fn update_billing(&self, billing: BillingSettings) -> Result<()> {
        let mut guard = self.data.write().unwrap();
        guard.billing = billing;
        self.persist(&guard)
    }

    /// Re-read the settings file, picking up edits made out-of-band.
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read settings from {}", self.path.display()))?;
        let data: OpsSettings = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &OpsSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write settings to {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("settings.json")).unwrap();
        assert_eq!(store.limits().daily_limit_hours, 8.0);
        assert_eq!(store.limits().warning_window_minutes, 15);
        assert_eq!(store.billing().hourly_rate, 22.0);
    }

    #[test]
    fn update_then_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = ConfigStore::new(path.clone()).unwrap();
        store
            .update_limits(LimitSettings {
                daily_limit_hours: 10.0,
                warning_window_minutes: 5,
                poll_interval_secs: 30,
            })
            .unwrap();

        // A second store over the same file sees the persisted values.
        let other = ConfigStore::new(path).unwrap();
        assert_eq!(other.limits().daily_limit_hours, 10.0);

        // And edits through one handle become visible after reload.
        other
            .update_billing(BillingSettings { hourly_rate: 31.5 })
            .unwrap();
        store.reload().unwrap();
        assert_eq!(store.billing().hourly_rate, 31.5);
    }
}
