//! Reading tunnel configuration from disk.

use std::{fs, path::Path};

use crate::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format {0:?} (use toml, yaml or json)")]
    UnsupportedFormat(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// On-disk configuration syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Yaml,
    /// JSON with `//` and `/* */` comments allowed.
    Json,
}

impl ConfigFormat {
    /// Pick the syntax from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" | "jsonc" => Ok(Self::Json),
            _ => Err(ConfigError::UnsupportedFormat(ext)),
        }
    }
}

/// Parse configuration text already in memory.
pub fn parse_config(data: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    let config = match format {
        ConfigFormat::Toml => toml::from_str(data)?,
        ConfigFormat::Yaml => serde_yaml::from_str(data)?,
        ConfigFormat::Json => {
            serde_json::from_reader(json_comments::StripComments::new(data.as_bytes()))?
        }
    };
    Ok(config)
}

/// Load a config file. The format comes from its extension and is checked
/// before the file is read.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let format = ConfigFormat::from_path(path)?;
    let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&data, format)
}
