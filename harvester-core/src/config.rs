use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::pattern::PatternSet;

/// Run-wide settings for the harvester, loaded from a YAML file.
///
/// Every field has a default mirroring the stock tool behavior, so a partial
/// config file (or none at all) is valid as long as `validate` passes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct HarvesterConfig {
    /// Minimum delay between page visits, in seconds.
    pub delay_between_requests: f64,
    /// Cap on page visits within any trailing 60-second window.
    pub max_requests_per_minute: usize,
    /// Per-page wait budget for the download signal, in seconds.
    pub timeout: f64,
    pub output_dir: PathBuf,
    /// Path to the external download-manager executable referenced by the
    /// generated queue script.
    pub idm_path: String,
    /// Directory the download manager should save into.
    pub download_dir: String,
    /// CSS selectors whose href/data attributes count as download links.
    pub download_link_selectors: Vec<String>,
    /// Glob patterns a captured network request must match to count as a
    /// media signal (manifests, segments, progressive files).
    pub xhr_patterns: Vec<String>,
    pub browser: BrowserSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct BrowserSection {
    /// Explicit Chromium binary; autodetected when absent.
    pub executable_path: Option<String>,
    pub headless: bool,
    pub sandbox: bool,
    pub user_agents: Vec<String>,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            delay_between_requests: 5.0,
            max_requests_per_minute: 10,
            timeout: 15.0,
            output_dir: PathBuf::from("./out"),
            idm_path: "C:/Program Files (x86)/Internet Download Manager/IDMan.exe".to_string(),
            download_dir: "C:/Downloads".to_string(),
            download_link_selectors: vec![
                "a.download-button".to_string(),
                "a[data-download]".to_string(),
                "a.video-download".to_string(),
                "a[href*='download']".to_string(),
                "a[href*='.mp4']".to_string(),
                "a[href*='.m3u8']".to_string(),
                "a[href*='.mpd']".to_string(),
                "[data-download-url]".to_string(),
                "[data-video-url]".to_string(),
            ],
            xhr_patterns: vec![
                "*.m3u8*".to_string(),
                "*.mpd*".to_string(),
                "*video*".to_string(),
                "*media*".to_string(),
                "*stream*".to_string(),
            ],
            browser: BrowserSection::default(),
        }
    }
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            executable_path: None,
            headless: true,
            sandbox: true,
            user_agents: vec![
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 13_4) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.5 Safari/605.1.15".to_string(),
            ],
        }
    }
}

impl HarvesterConfig {
    /// Fail-fast sanity checks; a run never starts on an invalid config.
    pub fn validate(&self) -> Result<()> {
        if !self.delay_between_requests.is_finite() || self.delay_between_requests < 0.0 {
            return Err(ConfigError::Invalid {
                field: "delay_between_requests",
                reason: format!("must be >= 0, got {}", self.delay_between_requests),
            });
        }
        if self.max_requests_per_minute < 1 {
            return Err(ConfigError::Invalid {
                field: "max_requests_per_minute",
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "timeout",
                reason: format!("must be > 0, got {}", self.timeout),
            });
        }
        if self.xhr_patterns.is_empty() {
            return Err(ConfigError::Invalid {
                field: "xhr_patterns",
                reason: "at least one pattern is required".to_string(),
            });
        }
        if self.idm_path.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "idm_path",
                reason: "must not be empty".to_string(),
            });
        }
        // Compile once here so bad globs surface before any network activity.
        self.compiled_patterns()?;
        Ok(())
    }

    pub fn compiled_patterns(&self) -> Result<PatternSet> {
        Ok(PatternSet::compile(&self.xhr_patterns)?)
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<HarvesterConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_config() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs/harvester.yaml");
        let config = load_config(path).expect("fixture config should parse");
        config.validate().expect("fixture config should validate");
        assert_eq!(config.max_requests_per_minute, 10);
        assert!(config.xhr_patterns.iter().any(|p| p.contains("m3u8")));
    }

    #[test]
    fn defaults_are_valid() {
        HarvesterConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_zero_rate_cap() {
        let config = HarvesterConfig {
            max_requests_per_minute: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "max_requests_per_minute",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_positive_timeout() {
        let config = HarvesterConfig {
            timeout: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_negative_delay() {
        let config = HarvesterConfig {
            delay_between_requests: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: HarvesterConfig =
            serde_yaml::from_str("timeout: 30.0\nmax_requests_per_minute: 4\n").unwrap();
        assert_eq!(config.timeout, 30.0);
        assert_eq!(config.max_requests_per_minute, 4);
        assert_eq!(config.delay_between_requests, 5.0);
        assert!(!config.download_link_selectors.is_empty());
    }
}
