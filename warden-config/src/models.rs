use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use warden_core::auth::domain::services::AuthenticationServiceBuilder;
use warden_core::auth::{HasherParams, PasswordPolicy};
use warden_core::AuthPolicy;

use crate::constants::{
    DEFAULT_PASSWORD_PEPPER, DEFAULT_TOKEN_DIGEST_KEY, DEFAULT_TOKEN_SIGNING_KEY,
};

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub dev_mode: bool,
    pub secrets: SecretsConfig,
    pub policy: AuthPolicy,
    pub metadata: ConfigMetadata,
}

impl Config {
    /// Builder preloaded with this config's policy and key material.
    /// Repositories, notifier and clock are left to the caller.
    pub fn service_builder(&self) -> AuthenticationServiceBuilder {
        let mut builder = AuthenticationServiceBuilder::new(
            self.policy.clone(),
            &self.secrets.password_pepper,
            &self.secrets.token_digest_key,
            &self.secrets.token_signing_key,
        );
        for key in &self.secrets.retired_signing_keys {
            builder = builder.retired_signing_key(key);
        }
        builder
    }
}

#[derive(Clone)]
pub struct SecretsConfig {
    pub password_pepper: String,
    pub token_signing_key: String,
    pub token_digest_key: String,
    /// Previous signing keys still accepted for verification.
    pub retired_signing_keys: Vec<String>,
}

impl fmt::Debug for SecretsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsConfig")
            .field("password_pepper", &"<redacted>")
            .field("token_signing_key", &"<redacted>")
            .field("token_digest_key", &"<redacted>")
            .field("retired_signing_keys", &self.retired_signing_keys.len())
            .finish()
    }
}

impl SecretsConfig {
    pub fn is_default_pepper(&self) -> bool {
        self.password_pepper == DEFAULT_PASSWORD_PEPPER
    }

    pub fn is_default_signing_key(&self) -> bool {
        self.token_signing_key == DEFAULT_TOKEN_SIGNING_KEY
    }

    pub fn is_default_digest_key(&self) -> bool {
        self.token_digest_key == DEFAULT_TOKEN_DIGEST_KEY
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            password_pepper: DEFAULT_PASSWORD_PEPPER.to_string(),
            token_signing_key: DEFAULT_TOKEN_SIGNING_KEY.to_string(),
            token_digest_key: DEFAULT_TOKEN_DIGEST_KEY.to_string(),
            retired_signing_keys: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
    /// Environment variables that replaced a file or default value.
    pub env_overrides: Vec<&'static str>,
}

/// On-disk shape. Durations stay strings until the loader parses them.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub dev_mode: bool,
    pub secrets: SecretsSection,
    pub tokens: TokensSection,
    pub otp: OtpSection,
    pub lockout: LockoutSection,
    pub password: PasswordPolicy,
    pub hasher: HasherParams,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct SecretsSection {
    pub password_pepper: Option<String>,
    pub token_signing_key: Option<String>,
    pub token_digest_key: Option<String>,
    pub retired_signing_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct TokensSection {
    pub access_ttl: Option<String>,
    pub refresh_ttl: Option<String>,
    pub family_max_lifetime: Option<String>,
    pub rotation_grace: Option<String>,
    pub issuer: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct OtpSection {
    pub ttl: Option<String>,
    pub max_attempts: Option<u32>,
    pub code_length: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct LockoutSection {
    pub max_failed_logins: Option<u32>,
    pub lockout_duration: Option<String>,
}
