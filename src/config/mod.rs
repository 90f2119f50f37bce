//! Sampling configuration, loaded from a TOML file and the environment.
//!
//! ```toml
//! tracing-mode = "always"      # never | always | through
//! sample-rate = 300000         # parts per million
//!
//! [layers.http]
//! sample-rate = 1000000
//! flags = ["sample-start", "sample-through-always"]
//! ```
//!
//! [`Config::load`] reads the file named by `XTRACE_CONFIG`, falling back to
//! `xtrace/config.toml` under the user's config directory, then applies the
//! `XTRACE_TRACING_MODE` and `XTRACE_SAMPLE_RATE` environment overrides.

use crate::event::protocol::EVENT_FORMAT_VERSION;
use crate::identity::wire::WIRE_VERSION;
use crate::sampling::settings::{SettingsFlags, SettingsStore};
pub use refined::*;
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "XTRACE_CONFIG";
pub const ENV_OVERRIDE_PREFIX: &str = "XTRACE_";

const CONFIG_DIR: &str = "xtrace";
const CONFIG_FILE_NAME: &str = "config.toml";

/// The X-Trace wire version this library reads and writes.
pub fn version() -> u8 {
    WIRE_VERSION
}

/// The newest event format revision this library reads and writes.
pub fn revision() -> u8 {
    EVENT_FORMAT_VERSION
}

/// Whether a peer speaking `version`/`revision` is compatible: the wire version must match
/// and the event format revision must be one this library knows.
pub fn check_version(version: u8, revision: u8) -> bool {
    version == WIRE_VERSION && revision <= EVENT_FORMAT_VERSION
}

/// Private, internal, raw representation of the TOML content
pub(crate) mod raw_toml {
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub(crate) struct Config {
        pub(crate) tracing_mode: Option<String>,
        pub(crate) sample_rate: Option<i64>,
        pub(crate) layers: BTreeMap<String, Layer>,
    }

    #[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
    #[serde(rename_all = "kebab-case", default)]
    pub(crate) struct Layer {
        pub(crate) sample_rate: Option<i64>,
        pub(crate) flags: Option<Vec<String>>,
    }
}

pub mod refined {
    use super::raw_toml;
    use crate::sampling::settings::{ConfiguredRate, LayerRate, Settings, SettingsFlags};
    use crate::sampling::{SampleRate, TracingMode};
    use std::collections::BTreeMap;

    #[derive(Debug, Clone, Default, PartialEq, Eq)]
    pub struct Config {
        pub tracing_mode: TracingMode,
        pub sample_rate: ConfiguredRate,
        pub layers: BTreeMap<String, LayerRate>,
    }

    impl Config {
        /// The initial settings this configuration describes. Nothing has been pushed yet.
        pub fn into_settings(self) -> Settings {
            Settings {
                tracing_mode: self.tracing_mode,
                sample_rate: self.sample_rate,
                layer_rates: self.layers,
                ..Default::default()
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SemanticErrorExplanation(pub String);

    /// Global rates outside `0..=RESOLUTION` are kept as misconfigured rather than rejected.
    pub(crate) fn configured_rate(raw: i64) -> ConfiguredRate {
        match SampleRate::try_from(raw) {
            Ok(rate) => ConfiguredRate::Rate(rate),
            Err(e) => {
                tracing::warn!(sample_rate = raw, error = %e, "Misconfigured sample rate, using the default");
                ConfiguredRate::Misconfigured(raw)
            }
        }
    }

    pub(crate) fn tracing_mode(raw: &str) -> Result<TracingMode, SemanticErrorExplanation> {
        raw.parse()
            .map_err(|_| SemanticErrorExplanation(format!(
                "tracing-mode must be one of \"never\", \"always\" or \"through\", found {raw:?}"
            )))
    }

    pub(crate) fn flags<'a, I: IntoIterator<Item = &'a str>>(
        names: I,
    ) -> Result<SettingsFlags, SemanticErrorExplanation> {
        names
            .into_iter()
            .map(flag)
            .try_fold(SettingsFlags::OK, |acc, f| f.map(|f| acc | f))
    }

    fn flag(raw: &str) -> Result<SettingsFlags, SemanticErrorExplanation> {
        Ok(match raw {
            "override" => SettingsFlags::OVERRIDE,
            "sample-start" => SettingsFlags::SAMPLE_START,
            "sample-through" => SettingsFlags::SAMPLE_THROUGH,
            "sample-through-always" => SettingsFlags::SAMPLE_THROUGH_ALWAYS,
            "sample-avw-always" => SettingsFlags::SAMPLE_AVW_ALWAYS,
            _ => {
                return Err(SemanticErrorExplanation(format!(
                    "Unknown sampling flag {raw:?}"
                )))
            }
        })
    }

    impl TryFrom<raw_toml::Config> for Config {
        type Error = SemanticErrorExplanation;

        fn try_from(value: raw_toml::Config) -> Result<Self, Self::Error> {
            let mut layers = BTreeMap::new();
            for (name, layer) in value.layers {
                let raw_rate = layer.sample_rate.ok_or_else(|| {
                    SemanticErrorExplanation(format!("Layer {name:?} is missing a sample-rate"))
                })?;
                let rate = SampleRate::try_from(raw_rate).map_err(|e| {
                    SemanticErrorExplanation(format!("Layer {name:?}: {e}"))
                })?;
                let layer_flags = match layer.flags {
                    None => None,
                    Some(names) => Some(flags(names.iter().map(String::as_str))?),
                };
                layers.insert(
                    name,
                    LayerRate {
                        rate,
                        flags: layer_flags,
                    },
                );
            }

            Ok(Config {
                tracing_mode: match value.tracing_mode {
                    Some(m) => tracing_mode(&m)?,
                    None => TracingMode::default(),
                },
                sample_rate: value
                    .sample_rate
                    .map(configured_rate)
                    .unwrap_or_default(),
                layers,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Error in config file {} relating to TOML parsing. {error}", .path.display())]
    ConfigFileToml {
        path: PathBuf,
        #[source]
        error: toml::de::Error,
    },

    #[error("Error in config content relating to TOML parsing. {error}")]
    ConfigToml {
        #[source]
        error: toml::de::Error,
    },

    #[error("IO Error")]
    Io(#[from] std::io::Error),

    #[error("Error in config content relating to semantics. {explanation}")]
    DefinitionSemantics { explanation: String },

    #[error("Error in environment variable overrides. {0}")]
    EnvOverride(#[from] envy::Error),
}

impl From<SemanticErrorExplanation> for ConfigLoadError {
    fn from(semantics: SemanticErrorExplanation) -> Self {
        ConfigLoadError::DefinitionSemantics {
            explanation: semantics.0,
        }
    }
}

pub fn try_from_file(path: &Path) -> Result<Config, ConfigLoadError> {
    let content = &std::fs::read_to_string(path)?;
    let partial: raw_toml::Config =
        toml::from_str(content).map_err(|e| ConfigLoadError::ConfigFileToml {
            path: path.to_owned(),
            error: e,
        })?;
    Ok(partial.try_into()?)
}

pub fn try_from_str(content: &str) -> Result<Config, ConfigLoadError> {
    let partial: raw_toml::Config =
        toml::from_str(content).map_err(|e| ConfigLoadError::ConfigToml { error: e })?;
    Ok(partial.try_into()?)
}

#[derive(Debug, Default, serde::Deserialize)]
struct EnvOverrides {
    // XTRACE_TRACING_MODE environment variable
    tracing_mode: Option<String>,

    // XTRACE_SAMPLE_RATE environment variable
    sample_rate: Option<i64>,
}

impl Config {
    /// Load the configuration file, if there is one, and apply environment overrides.
    pub fn load() -> Result<Config, ConfigLoadError> {
        let mut cfg = match config_file_path() {
            Some(p) if p.exists() => {
                tracing::trace!("Load configuration file {}", p.display());
                try_from_file(&p)?
            }
            Some(p) if env::var_os(CONFIG_ENV_VAR).is_some() => {
                tracing::warn!(
                    "Configuration file {} named by {CONFIG_ENV_VAR} does not exist, using defaults",
                    p.display()
                );
                Config::default()
            }
            _ => Config::default(),
        };
        cfg.apply_environment_variable_overrides()?;
        Ok(cfg)
    }

    pub fn apply_environment_variable_overrides(&mut self) -> Result<(), ConfigLoadError> {
        let overrides = envy::prefixed(ENV_OVERRIDE_PREFIX).from_env::<EnvOverrides>()?;
        if let Some(m) = overrides.tracing_mode {
            self.tracing_mode = refined::tracing_mode(&m)?;
        }
        if let Some(r) = overrides.sample_rate {
            self.sample_rate = refined::configured_rate(r);
        }
        Ok(())
    }
}

impl From<Config> for SettingsStore {
    fn from(config: Config) -> Self {
        SettingsStore::new(config.into_settings())
    }
}

fn config_file_path() -> Option<PathBuf> {
    env::var_os(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|d| d.join(CONFIG_DIR).join(CONFIG_FILE_NAME)))
}

/// Parse sampling flags as layer entries spell them, e.g. `"sample-through-always"`.
pub fn parse_flags<'a, I: IntoIterator<Item = &'a str>>(
    names: I,
) -> Result<SettingsFlags, ConfigLoadError> {
    Ok(refined::flags(names)?)
}
