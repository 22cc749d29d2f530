use crate::calc::ScaleConfig;
use serde::Deserialize;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "notasd.toml";

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub scale: ScaleSection,
    pub import: ImportConfig,
}

/// `[scale]` in snake_case, as written by hand in the TOML file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ScaleSection {
    pub min_grade: f64,
    pub pass_percentage: f64,
    pub max_grade: f64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ImportConfig {
    pub max_rows: usize,
}

impl Default for ScaleSection {
    fn default() -> Self {
        let s = ScaleConfig::default();
        Self {
            min_grade: s.min_grade,
            pass_percentage: s.pass_percentage,
            max_grade: s.max_grade,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self { max_rows: 5000 }
    }
}

impl Config {
    /// Load `notasd.toml` from the workspace. Falls back to defaults if the
    /// file is missing or unreadable.
    pub fn load_for_workspace(workspace: &Path) -> Self {
        Self::load(workspace.join(CONFIG_FILE_NAME))
    }

    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("config file {} not found, using defaults", path.display());
            return Self::default();
        }
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!("config loaded from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("failed to parse {}: {e}, using defaults", path.display());
                    return Self::default();
                }
            },
            Err(e) => {
                tracing::warn!("failed to read {}: {e}, using defaults", path.display());
                return Self::default();
            }
        };

        if let Err(e) = config.scale().validate() {
            tracing::warn!("ignoring [scale] in {}: {e}", path.display());
            return Self {
                scale: ScaleSection::default(),
                ..config
            };
        }
        config
    }

    pub fn scale(&self) -> ScaleConfig {
        ScaleConfig {
            min_grade: self.scale.min_grade,
            pass_percentage: self.scale.pass_percentage,
            max_grade: self.scale.max_grade,
        }
    }
}
