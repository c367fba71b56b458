pub mod error;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use tracing::{debug, info, warn};
use warden_core::auth::{LockoutPolicy, OtpPolicy, TokenPolicy};
use warden_core::AuthPolicy;

use crate::constants::{
    ENV_DEV_MODE, ENV_PASSWORD_PEPPER, ENV_TOKEN_DIGEST_KEY, ENV_TOKEN_SIGNING_KEY,
};
use crate::models::{
    Config, ConfigFile, ConfigMetadata, LockoutSection, OtpSection, SecretsConfig, TokensSection,
};
use crate::validation::{ConfigWarnings, apply_guard_rails};

use error::ConfigLoadError;

/// Where environment overrides come from.
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// The process environment.
    #[default]
    Process,
    /// A fixed set of variables. Used by tests and embedders that manage
    /// their own environment.
    Fixed(HashMap<String, String>),
    /// No overrides at all.
    Disabled,
}

impl EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            Self::Process => std::env::var(key).ok(),
            Self::Fixed(vars) => vars.get(key).cloned(),
            Self::Disabled => None,
        }
    }
}

/// Result of a successful load.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

/// Loads configuration with precedence: environment, then `.env` file, then
/// the TOML file, then built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_file: Option<PathBuf>,
    env: EnvSource,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Read `KEY=value` pairs from this file. The process environment is
    /// left untouched.
    pub fn with_env_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.env_file = Some(path.into());
        self
    }

    pub fn with_env(mut self, env: EnvSource) -> Self {
        self.env = env;
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let file = match &self.config_path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };

        let dotenv = match &self.env_file {
            Some(path) => Some(read_env_file(path)?),
            None => None,
        };
        let lookup = |key: &str| {
            self.env.get(key).or_else(|| {
                dotenv.as_ref().and_then(|vars| vars.get(key).cloned())
            })
        };

        let mut metadata = ConfigMetadata {
            config_path: self.config_path.clone(),
            env_file_loaded: dotenv.is_some(),
            env_overrides: Vec::new(),
        };

        let dev_mode = match lookup(ENV_DEV_MODE) {
            Some(raw) => {
                metadata.env_overrides.push(ENV_DEV_MODE);
                parse_bool(ENV_DEV_MODE, &raw)?
            }
            None => file.dev_mode,
        };

        let defaults = SecretsConfig::default();
        let mut secret = |key: &'static str,
                          from_file: Option<String>,
                          fallback: String| {
            if let Some(value) = lookup(key) {
                metadata.env_overrides.push(key);
                value
            } else {
                from_file.unwrap_or(fallback)
            }
        };
        let secrets = SecretsConfig {
            password_pepper: secret(
                ENV_PASSWORD_PEPPER,
                file.secrets.password_pepper,
                defaults.password_pepper,
            ),
            token_signing_key: secret(
                ENV_TOKEN_SIGNING_KEY,
                file.secrets.token_signing_key,
                defaults.token_signing_key,
            ),
            token_digest_key: secret(
                ENV_TOKEN_DIGEST_KEY,
                file.secrets.token_digest_key,
                defaults.token_digest_key,
            ),
            retired_signing_keys: file.secrets.retired_signing_keys,
        };

        let policy = AuthPolicy {
            token: token_policy(&file.tokens)?,
            otp: otp_policy(&file.otp)?,
            lockout: lockout_policy(&file.lockout)?,
            password: file.password,
            hasher: file.hasher,
        };

        let config = Config {
            dev_mode,
            secrets,
            policy,
            metadata,
        };

        let warnings = apply_guard_rails(&config)?;
        for warning in &warnings.items {
            warn!(hint = ?warning.hint, "{}", warning.message);
        }
        info!(
            dev_mode = config.dev_mode,
            config_path = ?config.metadata.config_path,
            env_overrides = ?config.metadata.env_overrides,
            "loaded warden configuration"
        );

        Ok(ConfigLoad { config, warnings })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigLoadError> {
    let raw =
        fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    toml::from_str(&raw).map_err(|source| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigLoadError> {
    let mut vars = HashMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        vars.insert(key, value);
    }
    debug!(path = %path.display(), count = vars.len(), "read env file");
    Ok(vars)
}

fn parse_bool(field: &'static str, raw: &str) -> Result<bool, ConfigLoadError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigLoadError::InvalidBool {
            field,
            value: raw.to_string(),
        }),
    }
}

fn duration_or(
    field: &'static str,
    raw: Option<&str>,
    default: Duration,
) -> Result<Duration, ConfigLoadError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let parsed = humantime::parse_duration(raw.trim()).map_err(|source| {
        ConfigLoadError::InvalidDuration {
            field,
            value: raw.to_string(),
            source,
        }
    })?;
    Duration::from_std(parsed)
        .map_err(|_| ConfigLoadError::DurationOutOfRange { field })
}

fn token_policy(section: &TokensSection) -> Result<TokenPolicy, ConfigLoadError> {
    let defaults = TokenPolicy::default();
    Ok(TokenPolicy {
        access_ttl: duration_or(
            "tokens.access_ttl",
            section.access_ttl.as_deref(),
            defaults.access_ttl,
        )?,
        refresh_ttl: duration_or(
            "tokens.refresh_ttl",
            section.refresh_ttl.as_deref(),
            defaults.refresh_ttl,
        )?,
        family_max_lifetime: duration_or(
            "tokens.family_max_lifetime",
            section.family_max_lifetime.as_deref(),
            defaults.family_max_lifetime,
        )?,
        rotation_grace: duration_or(
            "tokens.rotation_grace",
            section.rotation_grace.as_deref(),
            defaults.rotation_grace,
        )?,
        issuer: section.issuer.clone().unwrap_or(defaults.issuer),
    })
}

fn otp_policy(section: &OtpSection) -> Result<OtpPolicy, ConfigLoadError> {
    let defaults = OtpPolicy::default();
    Ok(OtpPolicy {
        ttl: duration_or("otp.ttl", section.ttl.as_deref(), defaults.ttl)?,
        max_attempts: section.max_attempts.unwrap_or(defaults.max_attempts),
        code_length: section.code_length.unwrap_or(defaults.code_length),
    })
}

fn lockout_policy(section: &LockoutSection) -> Result<LockoutPolicy, ConfigLoadError> {
    let defaults = LockoutPolicy::default();
    Ok(LockoutPolicy {
        max_failed_logins: section
            .max_failed_logins
            .unwrap_or(defaults.max_failed_logins),
        lockout_duration: duration_or(
            "lockout.lockout_duration",
            section.lockout_duration.as_deref(),
            defaults.lockout_duration,
        )?,
    })
}
