//! Configuration management for mau-model.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (MAU_CHIP_REV, MAU_STAGES, MAU_STRICT_WIDTH)
//! 2. Project-local config file (`./mau-model.toml`)
//! 3. User config file (`~/.config/mau-model/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # mau-model.toml
//!
//! # Silicon revision whose register layout is modelled (A0 or B0)
//! chip_rev = "B0"
//!
//! # Number of MAU stages
//! stages = 12
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::device::registers_spec::{DEFAULT_STAGES, MAX_STAGES};
use crate::device::ChipRev;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// mau-model configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Chip revision ("A0" or "B0").
    /// Selects the register layout used for revision-specific controls.
    pub chip_rev: Option<String>,

    /// Number of MAU stages in the pipeline.
    pub stages: Option<usize>,

    /// Reject register values wider than the register instead of
    /// truncating them.
    pub strict_width: Option<bool>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `mau-model.toml`
    /// 3. User config `~/.config/mau-model/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Chip revision, A0 when unset or unparseable.
    pub fn chip_rev(&self) -> ChipRev {
        match self.chip_rev.as_deref().map(str::parse::<ChipRev>) {
            Some(Ok(rev)) => rev,
            Some(Err(e)) => {
                log::warn!("{}, using {}", e, ChipRev::default());
                ChipRev::default()
            }
            None => ChipRev::default(),
        }
    }

    /// Number of stages, clamped to 1..=16.
    pub fn stages(&self) -> usize {
        self.stages.unwrap_or(DEFAULT_STAGES).clamp(1, MAX_STAGES)
    }

    /// Whether over-wide register values are rejected.
    pub fn strict_width(&self) -> bool {
        self.strict_width.unwrap_or(false)
    }

    /// Load user configuration from ~/.config/mau-model/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./mau-model.toml
    fn load_local_config() -> Option<Self> {
        if let Some(config) = Self::load_from_file(Path::new("mau-model.toml")) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("mau-model.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.chip_rev.is_some() {
            self.chip_rev = other.chip_rev;
        }
        if other.stages.is_some() {
            self.stages = other.stages;
        }
        if other.strict_width.is_some() {
            self.strict_width = other.strict_width;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(rev) = std::env::var("MAU_CHIP_REV") {
            log::info!("Using MAU_CHIP_REV from environment: {}", rev);
            self.chip_rev = Some(rev);
        }
        if let Ok(stages) = std::env::var("MAU_STAGES") {
            match stages.parse() {
                Ok(n) => {
                    log::info!("Using MAU_STAGES from environment: {}", n);
                    self.stages = Some(n);
                }
                Err(e) => log::warn!("Ignoring MAU_STAGES={}: {}", stages, e),
            }
        }
        if let Ok(strict) = std::env::var("MAU_STRICT_WIDTH") {
            let on = matches!(strict.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
            log::info!("Using MAU_STRICT_WIDTH from environment: {}", on);
            self.strict_width = Some(on);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("mau-model").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# mau-model configuration
# Place this file at ~/.config/mau-model/config.toml or ./mau-model.toml

# Silicon revision (A0 or B0); B0 also needs the action bus half enables
chip_rev = "A0"

# Number of MAU stages (1..=16)
stages = 12

# Reject register values wider than the register (default: truncate and warn)
# strict_width = true
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.chip_rev(), ChipRev::A0);
        assert_eq!(config.stages(), DEFAULT_STAGES);
        assert!(!config.strict_width());
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            chip_rev: Some("A0".to_string()),
            stages: None,
            strict_width: Some(true),
        };

        let overlay = Config {
            chip_rev: None,
            stages: Some(4),
            strict_width: Some(false),
        };

        base.merge(overlay);

        // chip_rev unchanged (overlay was None)
        assert_eq!(base.chip_rev, Some("A0".to_string()));
        assert_eq!(base.stages, Some(4));
        assert_eq!(base.strict_width, Some(false));
    }

    #[test]
    fn test_accessors_sanitize() {
        let config = Config {
            chip_rev: Some("zz".to_string()),
            stages: Some(40),
            strict_width: None,
        };
        assert_eq!(config.chip_rev(), ChipRev::A0);
        assert_eq!(config.stages(), MAX_STAGES);

        let config = Config { stages: Some(0), chip_rev: Some("b0".to_string()), ..Default::default() };
        assert_eq!(config.stages(), 1);
        assert_eq!(config.chip_rev(), ChipRev::B0);
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.stages(), 12);
    }
}
