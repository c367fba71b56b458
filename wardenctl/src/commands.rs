use std::io::{self, Read};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;
use warden_config::{Config, ConfigLoad};
use warden_core::auth::CredentialHasher;
use warden_core::auth::domain::services::TokenCodec;
use warden_core::rbac::RoleSet;
use zeroize::Zeroizing;

pub fn check_config(load: &ConfigLoad, as_json: bool) -> Result<()> {
    let config = &load.config;
    let policy = &config.policy;

    if as_json {
        let summary = json!({
            "dev_mode": config.dev_mode,
            "config_path": config.metadata.config_path,
            "env_overrides": config.metadata.env_overrides,
            "tokens": {
                "access_ttl_secs": policy.token.access_ttl.num_seconds(),
                "refresh_ttl_secs": policy.token.refresh_ttl.num_seconds(),
                "family_max_lifetime_secs":
                    policy.token.family_max_lifetime.num_seconds(),
                "rotation_grace_secs":
                    policy.token.rotation_grace.num_seconds(),
                "issuer": policy.token.issuer,
            },
            "otp": {
                "ttl_secs": policy.otp.ttl.num_seconds(),
                "max_attempts": policy.otp.max_attempts,
                "code_length": policy.otp.code_length,
            },
            "lockout": {
                "max_failed_logins": policy.lockout.max_failed_logins,
                "lockout_duration_secs":
                    policy.lockout.lockout_duration.num_seconds(),
            },
            "password": policy.password,
            "hasher": policy.hasher,
            "warnings": load
                .warnings
                .items
                .iter()
                .map(|w| json!({ "message": w.message, "hint": w.hint }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("configuration OK");
    println!("  dev mode:        {}", config.dev_mode);
    println!("  access ttl:      {}", policy.token.access_ttl);
    println!("  refresh ttl:     {}", policy.token.refresh_ttl);
    println!("  rotation grace:  {}", policy.token.rotation_grace);
    println!("  otp attempts:    {}", policy.otp.max_attempts);
    println!("  lockout after:   {}", policy.lockout.max_failed_logins);
    for warning in &load.warnings.items {
        match &warning.hint {
            Some(hint) => println!("warning: {} ({hint})", warning.message),
            None => println!("warning: {}", warning.message),
        }
    }
    Ok(())
}

pub fn hash_secret(config: &Config) -> Result<()> {
    let mut raw = Zeroizing::new(String::new());
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read secret from stdin")?;
    let secret = raw.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        bail!("no secret on stdin");
    }

    let hasher = CredentialHasher::new(&config.secrets.password_pepper, config.policy.hasher)?;
    println!("{}", hasher.hash(secret)?);
    Ok(())
}

pub fn issue_token(config: &Config, subject_id: Uuid, roles: RoleSet, force: bool) -> Result<()> {
    if !config.dev_mode {
        if !force {
            bail!("refusing to mint tokens outside dev mode without --force");
        }
        warn!(%subject_id, "minting access token with production key");
    }

    let codec = TokenCodec::new(&config.secrets.token_signing_key, &config.policy.token)?;
    let signed = codec.issue_access_token(subject_id, &roles, Utc::now())?;
    info!(
        %subject_id,
        roles = %roles,
        expires_at = %signed.expires_at,
        "issued access token"
    );
    println!("{}", signed.token);
    Ok(())
}

pub fn inspect_token(config: &Config, token: &str) -> Result<()> {
    let mut codec = TokenCodec::new(&config.secrets.token_signing_key, &config.policy.token)?;
    for key in &config.secrets.retired_signing_keys {
        codec = codec.with_retired_key(key)?;
    }

    let claims = codec
        .verify_access_token(token.trim(), Utc::now())
        .context("access token rejected")?;
    println!("{}", serde_json::to_string_pretty(&claims)?);
    Ok(())
}

#[cfg(feature = "database")]
pub async fn migrate(database_url: &str) -> Result<()> {
    let pool = sqlx::PgPool::connect(database_url)
        .await
        .context("failed to connect to database")?;
    warden_core::MIGRATOR
        .run(&pool)
        .await
        .context("failed to apply migrations")?;
    info!("migrations applied");
    Ok(())
}
