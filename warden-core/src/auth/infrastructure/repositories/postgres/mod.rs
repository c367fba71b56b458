//! PostgreSQL adapters
//!
//! Queries are built at runtime with `sqlx::query` so the crate builds
//! without a live database or an offline query cache. Schema lives in
//! `warden-core/migrations` and ships as [`crate::MIGRATOR`].

mod auth_event_repository;
mod identity_repository;
mod otp_challenge_repository;
mod token_family_repository;

pub use auth_event_repository::PostgresAuthEventRepository;
pub use identity_repository::PostgresIdentityRepository;
pub use otp_challenge_repository::PostgresOtpChallengeRepository;
pub use token_family_repository::PostgresTokenFamilyRepository;

use anyhow::{Context, Result};

fn to_db_count(value: u32, what: &'static str) -> Result<i32> {
    i32::try_from(value).with_context(|| format!("{what} overflows INTEGER"))
}

fn from_db_count(value: i32, what: &'static str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("{what} is negative"))
}

fn to_db_version(value: u64) -> Result<i64> {
    i64::try_from(value).context("identity version overflows BIGINT")
}

fn from_db_version(value: i64) -> Result<u64> {
    u64::try_from(value).context("identity version is negative")
}
