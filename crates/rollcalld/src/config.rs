use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on (default: 127.0.0.1:8080).
    pub listen_addr: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Template encryption key file, created on first start.
    pub key_path: PathBuf,
    /// Passphrase to derive the template key from instead of the key file.
    pub template_passphrase: Option<String>,
    /// Maximum Euclidean distance for a positive identification.
    pub match_threshold: f32,
    /// Embedding length produced by the deployment's face model.
    pub template_dim: usize,
    /// Check-ins strictly after this local time are late.
    pub late_cutoff: NaiveTime,
    /// Fixed deployment offset; `None` uses the system time zone.
    pub utc_offset: Option<FixedOffset>,
    pub admin_user: String,
    /// Login is disabled while unset.
    pub admin_password: Option<String>,
    /// Lifetime of issued API tokens.
    pub token_ttl_secs: u64,
}

/// Shape of the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    listen_addr: Option<String>,
    db_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    template_passphrase: Option<String>,
    match_threshold: Option<f32>,
    template_dim: Option<usize>,
    late_cutoff: Option<String>,
    utc_offset: Option<String>,
    admin_user: Option<String>,
    admin_password: Option<String>,
    token_ttl_secs: Option<u64>,
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => Some(read_file(Path::new(&path))?),
            Err(_) => None,
        };
        Self::from_sources(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    fn from_sources(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let data_dir = env("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let listen_addr = pick(&env, "ROLLCALL_LISTEN_ADDR", file.listen_addr)
            .unwrap_or_else(|| "127.0.0.1:8080".to_string());
        let listen_addr = parse_value("listen_addr", &listen_addr)?;

        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| data_dir.join("rollcall.db"));

        let key_path = env("ROLLCALL_KEY_PATH")
            .map(PathBuf::from)
            .or(file.key_path)
            .unwrap_or_else(|| {
                db_path
                    .parent()
                    .map(|p| p.join("template.key"))
                    .unwrap_or_else(|| data_dir.join("template.key"))
            });

        let match_threshold = match env("ROLLCALL_MATCH_THRESHOLD") {
            Some(v) => parse_value("match_threshold", &v)?,
            None => file.match_threshold.unwrap_or(0.6),
        };
        if !match_threshold.is_finite() || match_threshold <= 0.0 {
            return Err(invalid("match_threshold", match_threshold));
        }

        let template_dim = match env("ROLLCALL_TEMPLATE_DIM") {
            Some(v) => parse_value("template_dim", &v)?,
            None => file.template_dim.unwrap_or(128),
        };
        if template_dim == 0 {
            return Err(invalid("template_dim", template_dim));
        }

        let late_cutoff = pick(&env, "ROLLCALL_LATE_CUTOFF", file.late_cutoff)
            .unwrap_or_else(|| "09:00".to_string());
        let late_cutoff = parse_time_of_day(&late_cutoff)?;

        let utc_offset = pick(&env, "ROLLCALL_UTC_OFFSET", file.utc_offset)
            .map(|v| parse_value::<FixedOffset>("utc_offset", &v))
            .transpose()?;

        let token_ttl_secs = match env("ROLLCALL_TOKEN_TTL_SECS") {
            Some(v) => parse_value("token_ttl_secs", &v)?,
            None => file.token_ttl_secs.unwrap_or(12 * 60 * 60),
        };

        Ok(Self {
            listen_addr,
            db_path,
            key_path,
            template_passphrase: env("ROLLCALL_TEMPLATE_KEY").or(file.template_passphrase),
            match_threshold,
            template_dim,
            late_cutoff,
            utc_offset,
            admin_user: pick(&env, "ROLLCALL_ADMIN_USER", file.admin_user)
                .unwrap_or_else(|| "admin".to_string()),
            admin_password: env("ROLLCALL_ADMIN_PASSWORD").or(file.admin_password),
            token_ttl_secs,
        })
    }

    /// Wall-clock time in the deployment time zone.
    pub fn to_local(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self.utc_offset {
            Some(offset) => at.with_timezone(&offset).naive_local(),
            None => at.with_timezone(&Local).naive_local(),
        }
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.to_local(Utc::now())
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Environment value first, then the file value.
fn pick(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
    file_value: Option<String>,
) -> Option<String> {
    env(key).or(file_value)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| invalid(key, value))
}

fn parse_time_of_day(value: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value.trim(), "%H:%M:%S"))
        .map_err(|_| invalid("late_cutoff", value))
}

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for in-process tests: fixed UTC offset, small templates.
    pub fn for_tests(template_dim: usize) -> Self {
        Self {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            db_path: PathBuf::from(":memory:"),
            key_path: PathBuf::from("unused.key"),
            template_passphrase: None,
            match_threshold: 0.6,
            template_dim,
            late_cutoff: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            utc_offset: Some(FixedOffset::east_opt(0).unwrap()),
            admin_user: "admin".into(),
            admin_password: Some("secret".into()),
            token_ttl_secs: 3600,
        }
    }
}
