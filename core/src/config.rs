//! Server configuration.
//!
//! Defaults live in code; `$MORFX_HOME/config.toml` (default `~/.morfx`)
//! overrides them, and [`ConfigOverrides`] lets embedders and tests override
//! both without touching the filesystem.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;

pub const CONFIG_TOML_FILE: &str = "config.toml";
pub const DB_FILE: &str = "morfx.db";

/// How confidence limits are enforced by the safety manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    PerFile,
    Global,
    Both,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub morfx_home: PathBuf,
    pub staging: StagingConfig,
    pub safety: SafetyConfig,
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    /// When false the server runs stateless: transforms are applied or
    /// reported, never persisted as stages.
    pub enabled: bool,
    pub ttl: Duration,
    pub max_stages_per_session: i64,
    pub max_applies_per_session: i64,
    pub auto_apply: bool,
    pub auto_apply_threshold: f64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(15 * 60),
            max_stages_per_session: 64,
            max_applies_per_session: 256,
            auto_apply: true,
            auto_apply_threshold: 0.85,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SafetyConfig {
    pub max_files: usize,
    pub max_file_size: u64,
    pub max_total_size: u64,
    pub confidence_mode: ConfidenceMode,
    pub per_file_threshold: f64,
    pub global_threshold: f64,
    pub lock_timeout: Duration,
    pub atomic_writes: bool,
    pub backups: bool,
    pub backup_suffix: String,
    pub backup_retention: Duration,
    pub integrity_checks: bool,
    pub transaction_dir: PathBuf,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            max_files: 32,
            max_file_size: 4 * 1024 * 1024,
            max_total_size: 32 * 1024 * 1024,
            confidence_mode: ConfidenceMode::PerFile,
            per_file_threshold: 0.7,
            global_threshold: 0.8,
            lock_timeout: Duration::from_secs(30),
            atomic_writes: true,
            backups: true,
            backup_suffix: ".morfx.bak".to_string(),
            backup_retention: Duration::from_secs(5),
            integrity_checks: true,
            transaction_dir: PathBuf::from("./.morfx/transactions"),
        }
    }
}

/// Strongly-typed overrides applied on top of `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub morfx_home: Option<PathBuf>,
    pub staging_enabled: Option<bool>,
    pub staging_ttl: Option<Duration>,
    pub auto_apply: Option<bool>,
    pub auto_apply_threshold: Option<f64>,
    pub lock_timeout: Option<Duration>,
    pub atomic_writes: Option<bool>,
    pub backups: Option<bool>,
    pub backup_retention: Option<Duration>,
    pub integrity_checks: Option<bool>,
    pub transaction_dir: Option<PathBuf>,
}

impl Config {
    /// Load `config.toml` from the morfx home (creating the directory if
    /// needed) and fold in the overrides.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> std::io::Result<Self> {
        let morfx_home = match &overrides.morfx_home {
            Some(home) => home.clone(),
            None => find_morfx_home()?,
        };
        std::fs::create_dir_all(&morfx_home)?;

        let toml_cfg = load_config_toml(&morfx_home)?;
        Ok(Self::from_parts(morfx_home, toml_cfg, overrides))
    }

    fn from_parts(morfx_home: PathBuf, toml_cfg: ConfigToml, overrides: ConfigOverrides) -> Self {
        let mut staging = StagingConfig::default();
        if let Some(t) = toml_cfg.staging {
            if let Some(v) = t.enabled {
                staging.enabled = v;
            }
            if let Some(v) = t.ttl_secs {
                staging.ttl = Duration::from_secs(v);
            }
            if let Some(v) = t.max_stages_per_session {
                staging.max_stages_per_session = v;
            }
            if let Some(v) = t.max_applies_per_session {
                staging.max_applies_per_session = v;
            }
            if let Some(v) = t.auto_apply {
                staging.auto_apply = v;
            }
            if let Some(v) = t.auto_apply_threshold {
                staging.auto_apply_threshold = v;
            }
        }
        if let Some(v) = overrides.staging_enabled {
            staging.enabled = v;
        }
        if let Some(v) = overrides.staging_ttl {
            staging.ttl = v;
        }
        if let Some(v) = overrides.auto_apply {
            staging.auto_apply = v;
        }
        if let Some(v) = overrides.auto_apply_threshold {
            staging.auto_apply_threshold = v;
        }

        let mut safety = SafetyConfig::default();
        if let Some(t) = toml_cfg.safety {
            if let Some(v) = t.max_files {
                safety.max_files = v;
            }
            if let Some(v) = t.max_file_size {
                safety.max_file_size = v;
            }
            if let Some(v) = t.max_total_size {
                safety.max_total_size = v;
            }
            if let Some(v) = t.confidence_mode {
                safety.confidence_mode = v;
            }
            if let Some(v) = t.per_file_threshold {
                safety.per_file_threshold = v;
            }
            if let Some(v) = t.global_threshold {
                safety.global_threshold = v;
            }
            if let Some(v) = t.lock_timeout_ms {
                safety.lock_timeout = Duration::from_millis(v);
            }
            if let Some(v) = t.atomic_writes {
                safety.atomic_writes = v;
            }
            if let Some(v) = t.backups {
                safety.backups = v;
            }
            if let Some(v) = t.backup_suffix {
                safety.backup_suffix = v;
            }
            if let Some(v) = t.backup_retention_secs {
                safety.backup_retention = Duration::from_secs(v);
            }
            if let Some(v) = t.integrity_checks {
                safety.integrity_checks = v;
            }
            if let Some(v) = t.transaction_dir {
                safety.transaction_dir = v;
            }
        }
        if let Some(v) = overrides.lock_timeout {
            safety.lock_timeout = v;
        }
        if let Some(v) = overrides.atomic_writes {
            safety.atomic_writes = v;
        }
        if let Some(v) = overrides.backups {
            safety.backups = v;
        }
        if let Some(v) = overrides.backup_retention {
            safety.backup_retention = v;
        }
        if let Some(v) = overrides.integrity_checks {
            safety.integrity_checks = v;
        }
        if let Some(v) = overrides.transaction_dir {
            safety.transaction_dir = v;
        }

        Self {
            morfx_home,
            staging,
            safety,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.morfx_home.join(DB_FILE)
    }
}

/// Honor the `MORFX_HOME` environment variable when set so users (and
/// tests) can override the default location; otherwise `~/.morfx`.
pub fn find_morfx_home() -> std::io::Result<PathBuf> {
    if let Ok(val) = std::env::var("MORFX_HOME")
        && !val.is_empty()
    {
        return Ok(PathBuf::from(val));
    }

    let mut p = home_dir().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Could not find home directory",
        )
    })?;
    p.push(".morfx");
    Ok(p)
}

fn load_config_toml(morfx_home: &Path) -> std::io::Result<ConfigToml> {
    let config_path = morfx_home.join(CONFIG_TOML_FILE);
    let contents = match std::fs::read_to_string(&config_path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ConfigToml::default()),
        Err(e) => return Err(e),
    };
    toml::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    staging: Option<StagingToml>,
    safety: Option<SafetyToml>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StagingToml {
    enabled: Option<bool>,
    ttl_secs: Option<u64>,
    max_stages_per_session: Option<i64>,
    max_applies_per_session: Option<i64>,
    auto_apply: Option<bool>,
    auto_apply_threshold: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SafetyToml {
    max_files: Option<usize>,
    max_file_size: Option<u64>,
    max_total_size: Option<u64>,
    confidence_mode: Option<ConfidenceMode>,
    per_file_threshold: Option<f64>,
    global_threshold: Option<f64>,
    lock_timeout_ms: Option<u64>,
    atomic_writes: Option<bool>,
    backups: Option<bool>,
    backup_suffix: Option<String>,
    backup_retention_secs: Option<u64>,
    integrity_checks: Option<bool>,
    transaction_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_when_no_config_file() {
        let home = tempfile::tempdir().expect("tempdir");
        let cfg = Config::load_with_overrides(ConfigOverrides {
            morfx_home: Some(home.path().to_path_buf()),
            ..Default::default()
        })
        .expect("load config");

        assert!(cfg.staging.enabled);
        assert_eq!(cfg.staging.ttl, Duration::from_secs(900));
        assert_eq!(cfg.safety.backup_suffix, ".morfx.bak");
        assert_eq!(cfg.safety.lock_timeout, Duration::from_secs(30));
        assert!(cfg.safety.integrity_checks);
    }

    #[test]
    fn toml_values_override_defaults() {
        let home = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            home.path().join(CONFIG_TOML_FILE),
            r#"
[staging]
ttl_secs = 60
auto_apply = false

[safety]
confidence_mode = "both"
lock_timeout_ms = 250
backup_suffix = ".bak"
"#,
        )
        .expect("write config.toml");

        let cfg = Config::load_with_overrides(ConfigOverrides {
            morfx_home: Some(home.path().to_path_buf()),
            ..Default::default()
        })
        .expect("load config");

        assert_eq!(cfg.staging.ttl, Duration::from_secs(60));
        assert!(!cfg.staging.auto_apply);
        assert_eq!(cfg.safety.confidence_mode, ConfidenceMode::Both);
        assert_eq!(cfg.safety.lock_timeout, Duration::from_millis(250));
        assert_eq!(cfg.safety.backup_suffix, ".bak");
    }

    #[test]
    fn overrides_beat_toml() {
        let home = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            home.path().join(CONFIG_TOML_FILE),
            "[staging]\nttl_secs = 60\n",
        )
        .expect("write config.toml");

        let cfg = Config::load_with_overrides(ConfigOverrides {
            morfx_home: Some(home.path().to_path_buf()),
            staging_ttl: Some(Duration::from_millis(25)),
            ..Default::default()
        })
        .expect("load config");

        assert_eq!(cfg.staging.ttl, Duration::from_millis(25));
    }
}
