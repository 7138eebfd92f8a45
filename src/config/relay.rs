use std::net::{IpAddr, SocketAddr};
use std::path::{Component, PathBuf};

use crate::config::helpers::{optional_env, parse_bool_env, parse_string_env, parse_usize_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Port used when `CONVERSATION_API_PORT` is unset, unparsable or zero.
pub const DEFAULT_PORT: u16 = 3001;

/// Runtime configuration for the conversation relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub host: IpAddr,
    pub port: u16,
    pub uploads_dir: PathBuf,
    pub max_upload_files: usize,
    pub max_upload_file_bytes: usize,
    pub log_json: bool,
}

impl RelayConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Replace the uploads root, applying the same checks as
    /// `TRIAL_RELAY_UPLOADS_DIR`.
    pub fn set_uploads_dir(&mut self, raw: &str) -> Result<(), ConfigError> {
        self.uploads_dir = validate_uploads_dir(raw)?;
        Ok(())
    }

    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let host_raw = parse_string_env("CONVERSATION_API_HOST", settings.server.host.clone())?;
        let host = host_raw
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "CONVERSATION_API_HOST".to_string(),
                message: format!("'{host_raw}' is not an IP address"),
            })?;

        let port = match optional_env("CONVERSATION_API_PORT")? {
            Some(raw) => parse_port(&raw),
            None => port_or_default(settings.server.port),
        };

        let uploads_dir = {
            let raw = parse_string_env("TRIAL_RELAY_UPLOADS_DIR", settings.uploads.dir.clone())?;
            validate_uploads_dir(&raw)?
        };

        let max_upload_files =
            parse_usize_env("TRIAL_RELAY_MAX_UPLOAD_FILES", settings.uploads.max_files)?;
        if max_upload_files == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAL_RELAY_MAX_UPLOAD_FILES".to_string(),
                message: "must allow at least one file".to_string(),
            });
        }

        let max_upload_file_bytes =
            parse_usize_env("TRIAL_RELAY_MAX_UPLOAD_BYTES", settings.uploads.max_file_bytes)?;
        if max_upload_file_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                key: "TRIAL_RELAY_MAX_UPLOAD_BYTES".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            uploads_dir,
            max_upload_files,
            max_upload_file_bytes,
            log_json: parse_bool_env("TRIAL_RELAY_LOG_JSON", settings.logging.json)?,
        })
    }
}

/// Parse a port the lenient way: anything unusable means the default.
pub fn parse_port(raw: &str) -> u16 {
    match raw.trim().parse::<u16>() {
        Ok(port) => port_or_default(port),
        Err(_) => {
            tracing::warn!(
                value = raw,
                "CONVERSATION_API_PORT is not a valid port, using {}",
                DEFAULT_PORT
            );
            DEFAULT_PORT
        }
    }
}

fn port_or_default(port: u16) -> u16 {
    if port == 0 { DEFAULT_PORT } else { port }
}

fn validate_uploads_dir(raw: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "TRIAL_RELAY_UPLOADS_DIR".to_string(),
            message: "uploads directory must not be empty".to_string(),
        });
    }

    let raw_path = PathBuf::from(trimmed);
    let mut normalized = PathBuf::new();
    for component in raw_path.components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(ConfigError::InvalidValue {
                    key: "TRIAL_RELAY_UPLOADS_DIR".to_string(),
                    message: "uploads directory must not contain '..' components".to_string(),
                });
            }
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() || normalized.parent().is_none() {
        return Err(ConfigError::InvalidValue {
            key: "TRIAL_RELAY_UPLOADS_DIR".to_string(),
            message: "uploads directory must name a directory below the current one or an absolute path".to_string(),
        });
    }

    Ok(normalized)
}
