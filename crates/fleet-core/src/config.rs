//! fleet.toml configuration parser.
//!
//! Every field has a default, so a missing or partial file still yields a
//! working single-host setup using the local process backend.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub runtime: RuntimeSection,
    pub scheduler: SchedulerSection,
    pub health: HealthSection,
    pub platforms: PlatformsSection,
    pub docker: DockerSection,
    pub kubernetes: KubernetesSection,
}

/// Which backend to run. `Auto` probes Kubernetes, then Docker, then local.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Local,
    Docker,
    Kubernetes,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSection {
    pub backend: BackendPreference,
    /// Root under which every service gets its own working directory.
    pub work_dir: PathBuf,
    /// First port handed out to services.
    pub port_start: u16,
    /// Time a terminated unit is given before the kill is escalated.
    pub termination_grace: String,
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            backend: BackendPreference::Auto,
            work_dir: PathBuf::from("temp"),
            port_start: 30000,
            termination_grace: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub interval: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval: "1s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval: String,
    pub probe_timeout: String,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval: "2s".to_string(),
            probe_timeout: "500ms".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformsSection {
    /// Directory holding downloaded platform artifacts.
    pub cache_dir: PathBuf,
    /// JSON catalogue replacing the built-in one.
    pub catalogue: Option<PathBuf>,
    pub download_timeout: String,
}

impl Default for PlatformsSection {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("local/platforms"),
            catalogue: None,
            download_timeout: "2m".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerSection {
    pub image: String,
    pub container_prefix: String,
}

impl Default for DockerSection {
    fn default() -> Self {
        Self {
            image: "eclipse-temurin:21-jre".to_string(),
            container_prefix: "fleet".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KubernetesSection {
    pub namespace: String,
    pub image: String,
}

impl Default for KubernetesSection {
    fn default() -> Self {
        Self {
            namespace: "fleet".to_string(),
            image: "eclipse-temurin:21-jre".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: FleetConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject durations that are malformed, or zero where a period is
    /// required.
    pub fn validate(&self) -> anyhow::Result<()> {
        let periods = [
            ("scheduler.interval", &self.scheduler.interval),
            ("health.interval", &self.health.interval),
            ("health.probe_timeout", &self.health.probe_timeout),
            ("platforms.download_timeout", &self.platforms.download_timeout),
        ];
        for (field, value) in periods {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                Some(_) => anyhow::bail!("{field} must be greater than zero"),
                None => anyhow::bail!("{field}: invalid duration '{value}'"),
            }
        }
        if parse_duration(&self.runtime.termination_grace).is_none() {
            anyhow::bail!(
                "runtime.termination_grace: invalid duration '{}'",
                self.runtime.termination_grace
            );
        }
        Ok(())
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Re-root every relative path under `data_dir`.
    pub fn rebase(&mut self, data_dir: &Path) {
        if self.runtime.work_dir.is_relative() {
            self.runtime.work_dir = data_dir.join(&self.runtime.work_dir);
        }
        if self.platforms.cache_dir.is_relative() {
            self.platforms.cache_dir = data_dir.join(&self.platforms.cache_dir);
        }
    }

    pub fn scheduler_interval(&self) -> Duration {
        positive(&self.scheduler.interval).unwrap_or(Duration::from_secs(1))
    }

    pub fn health_interval(&self) -> Duration {
        positive(&self.health.interval).unwrap_or(Duration::from_secs(2))
    }

    pub fn probe_timeout(&self) -> Duration {
        positive(&self.health.probe_timeout).unwrap_or(Duration::from_millis(500))
    }

    pub fn termination_grace(&self) -> Duration {
        parse_duration(&self.runtime.termination_grace).unwrap_or(Duration::from_secs(5))
    }

    pub fn download_timeout(&self) -> Duration {
        positive(&self.platforms.download_timeout).unwrap_or(Duration::from_secs(120))
    }
}

fn positive(s: &str) -> Option<Duration> {
    parse_duration(s).filter(|d| !d.is_zero())
}

/// Parse a duration string like "5s", "500ms", "2m". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
