//! Gateway configuration loading.
//!
//! TOML is the sole config source. Follows the `forwarder.toml` loader
//! shape: a raw all-`Option` deserialize struct validated field-by-field
//! into a typed config, rather than `serde(default)` sprinkled over the
//! typed struct directly.
//!
//! # Required fields
//! - `schema_version = 1`
//!
//! Everything else falls back to a documented default.

use serde::Deserialize;
use std::path::Path;

use fix_session::PersistenceMode;

/// Top-level gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub schema_version: u32,
    pub session: SessionDefaults,
    pub logger: LoggerConfig,
}

/// Defaults applied to every [`fix_session::Session`] this gateway owns.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub heartbeat_interval_ms: u64,
    /// Whether a Logon with a lower-than-expected sequence number is
    /// tolerated instead of rejected. Defaults to `false`.
    pub allow_lower_seqnum_logon: bool,
    pub persistence_mode: PersistenceMode,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub compaction_size: usize,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    schema_version: Option<u32>,
    session: Option<RawSessionConfig>,
    logger: Option<RawLoggerConfig>,
}

#[derive(Debug, Deserialize)]
struct RawSessionConfig {
    heartbeat_interval_ms: Option<u64>,
    allow_lower_seqnum_logon: Option<bool>,
    persistence_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLoggerConfig {
    compaction_size: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Load gateway config from a path on disk.
pub fn load_config_from_path(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    load_config_from_str(&toml_str)
}

/// Load gateway config from an in-memory TOML document (used by tests and
/// by callers that already have the file contents, e.g. pulled from a
/// secrets manager).
pub fn load_config_from_str(toml_str: &str) -> Result<GatewayConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str)?;

    let schema_version = raw
        .schema_version
        .ok_or_else(|| ConfigError::MissingField("schema_version".to_owned()))?;
    if schema_version != 1 {
        return Err(ConfigError::InvalidValue {
            field: "schema_version".to_owned(),
            value: schema_version.to_string(),
        });
    }

    let session = match raw.session {
        Some(s) => SessionDefaults {
            heartbeat_interval_ms: s.heartbeat_interval_ms.unwrap_or(30_000),
            allow_lower_seqnum_logon: s.allow_lower_seqnum_logon.unwrap_or(false),
            persistence_mode: match s.persistence_mode.as_deref() {
                None | Some("transient") => PersistenceMode::Transient,
                Some("persistent") => PersistenceMode::Persistent,
                Some(other) => {
                    return Err(ConfigError::InvalidValue {
                        field: "session.persistence_mode".to_owned(),
                        value: other.to_owned(),
                    })
                }
            },
        },
        None => SessionDefaults {
            heartbeat_interval_ms: 30_000,
            allow_lower_seqnum_logon: false,
            persistence_mode: PersistenceMode::Transient,
        },
    };

    let logger = match raw.logger {
        Some(l) => LoggerConfig {
            compaction_size: l.compaction_size.unwrap_or(1_048_576),
        },
        None => LoggerConfig {
            compaction_size: 1_048_576,
        },
    };

    Ok(GatewayConfig {
        schema_version,
        session,
        logger,
    })
}
