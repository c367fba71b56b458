use chrono::Duration;
use thiserror::Error;

use crate::constants::{
    ENV_PASSWORD_PEPPER, ENV_TOKEN_DIGEST_KEY, ENV_TOKEN_SIGNING_KEY, MIN_SECRET_LENGTH,
};
use crate::models::{Config, SecretsConfig};

/// OTP code lengths the core accepts.
const OTP_CODE_LENGTHS: std::ops::RangeInclusive<u8> = 4..=10;

/// Below this Argon2 memory cost hashes are cheap to brute force.
const MIN_PRODUCTION_MEMORY_KIB: u32 = 19 * 1024;

#[derive(Debug, Error)]
pub enum ConfigGuardRailError {
    #[error("authentication secret {field} {reason}")]
    WeakSecret { field: &'static str, reason: String },
    #[error("invalid auth policy: {reason}")]
    InvalidPolicy { reason: String },
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }
}

pub fn apply_guard_rails(config: &Config) -> Result<ConfigWarnings, ConfigGuardRailError> {
    let mut warnings = ConfigWarnings::default();

    if config.dev_mode {
        if config.secrets.is_default_pepper()
            || config.secrets.is_default_signing_key()
            || config.secrets.is_default_digest_key()
        {
            warnings.push_with_hint(
                "placeholder auth secrets in use (dev mode)",
                "Set WARDEN_PASSWORD_PEPPER, WARDEN_TOKEN_SIGNING_KEY and \
                 WARDEN_TOKEN_DIGEST_KEY before deploying",
            );
        }
    } else {
        enforce_secrets(&config.secrets, &mut warnings)?;
    }

    validate_policy(config, &mut warnings)?;
    Ok(warnings)
}

fn enforce_secrets(
    secrets: &SecretsConfig,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    let checks = [
        (
            ENV_PASSWORD_PEPPER,
            &secrets.password_pepper,
            secrets.is_default_pepper(),
        ),
        (
            ENV_TOKEN_SIGNING_KEY,
            &secrets.token_signing_key,
            secrets.is_default_signing_key(),
        ),
        (
            ENV_TOKEN_DIGEST_KEY,
            &secrets.token_digest_key,
            secrets.is_default_digest_key(),
        ),
    ];

    for (field, value, is_placeholder) in checks {
        if is_placeholder {
            return Err(ConfigGuardRailError::WeakSecret {
                field,
                reason: "uses the default placeholder value".into(),
            });
        }
        if value.len() < MIN_SECRET_LENGTH {
            return Err(ConfigGuardRailError::WeakSecret {
                field,
                reason: format!("must be at least {MIN_SECRET_LENGTH} characters"),
            });
        }
    }

    if secrets.token_signing_key == secrets.token_digest_key {
        warnings.push_with_hint(
            "token signing key and token digest key are identical",
            "Use independent keys so one leak does not expose both",
        );
    }

    Ok(())
}

fn validate_policy(
    config: &Config,
    warnings: &mut ConfigWarnings,
) -> Result<(), ConfigGuardRailError> {
    let token = &config.policy.token;
    let otp = &config.policy.otp;

    if token.access_ttl <= Duration::zero() {
        return invalid("tokens.access_ttl must be positive");
    }
    if token.refresh_ttl <= token.access_ttl {
        return invalid("tokens.refresh_ttl must exceed tokens.access_ttl");
    }
    if token.rotation_grace < Duration::zero() {
        return invalid("tokens.rotation_grace cannot be negative");
    }
    if token.issuer.trim().is_empty() {
        return invalid("tokens.issuer cannot be empty");
    }
    if otp.ttl <= Duration::zero() {
        return invalid("otp.ttl must be positive");
    }
    if otp.max_attempts == 0 {
        return invalid("otp.max_attempts must be at least 1");
    }
    if !OTP_CODE_LENGTHS.contains(&otp.code_length) {
        return invalid(format!(
            "otp.code_length must be between {} and {}",
            OTP_CODE_LENGTHS.start(),
            OTP_CODE_LENGTHS.end()
        ));
    }

    if token.family_max_lifetime < token.refresh_ttl {
        warnings.push(
            "tokens.family_max_lifetime is shorter than tokens.refresh_ttl; \
             families will end before their sliding window does",
        );
    }
    if token.rotation_grace >= token.access_ttl {
        warnings.push_with_hint(
            "tokens.rotation_grace is not shorter than tokens.access_ttl",
            "Keep the grace window to a few seconds; it only needs to cover \
             network retries",
        );
    }
    if config.policy.lockout.max_failed_logins == 0 {
        warnings.push("lockout.max_failed_logins is 0; lockout is disabled");
    }
    if !config.dev_mode {
        if !config.policy.password.enforce {
            warnings.push("password policy is advisory; weak secrets will be accepted");
        }
        if config.policy.hasher.memory_kib < MIN_PRODUCTION_MEMORY_KIB {
            warnings.push_with_hint(
                format!(
                    "hasher.memory_kib = {} is below the recommended minimum",
                    config.policy.hasher.memory_kib
                ),
                format!("Use at least {MIN_PRODUCTION_MEMORY_KIB} KiB"),
            );
        }
    }

    Ok(())
}

fn invalid(reason: impl Into<String>) -> Result<(), ConfigGuardRailError> {
    Err(ConfigGuardRailError::InvalidPolicy {
        reason: reason.into(),
    })
}
