//! # Warden Core
//!
//! Authentication and authorization core for web applications built on
//! Warden: credential hashing, short-lived access tokens, refresh-token
//! rotation with reuse detection, one-time-password challenges, and
//! role-based access control at the request boundary.
//!
//! ## Overview
//!
//! - **Credential hashing**: Argon2id with a server-side pepper
//! - **Token codec**: signed, self-contained access tokens and opaque refresh
//!   tokens
//! - **Session store**: refresh-token families with atomic rotation and
//!   family-wide revocation when a superseded token is replayed
//! - **OTP engine**: hashed, purpose-bound, single-use numeric codes
//! - **RBAC**: set-membership checks over a closed role enum
//! - **Orchestrator**: login, refresh, logout, OTP and guard flows that
//!   coalesce internal failures into `Unauthorized`/`Forbidden`
//!
//! ## Feature Flags
//!
//! - `database`: PostgreSQL adapters for identities, token families, OTP
//!   challenges and the audit log
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use warden_core::auth::domain::services::{
//!     AuthenticationService, AuthenticationServiceBuilder,
//! };
//! use warden_core::auth::infrastructure::repositories::{
//!     InMemoryIdentityRepository, InMemoryOtpChallengeRepository,
//!     InMemoryTokenFamilyRepository, LoggingNotificationService,
//! };
//! use warden_core::auth::{AuthPolicy, SystemClock};
//!
//! fn build() -> Result<AuthenticationService, Box<dyn std::error::Error>> {
//!     let service = AuthenticationServiceBuilder::new(
//!         AuthPolicy::default(),
//!         "pepper-from-config",
//!         "token-digest-key",
//!         "access-token-signing-key",
//!     )
//!     .identities(Arc::new(InMemoryIdentityRepository::default()))
//!     .families(Arc::new(InMemoryTokenFamilyRepository::default()))
//!     .challenges(Arc::new(InMemoryOtpChallengeRepository::default()))
//!     .notifier(Arc::new(LoggingNotificationService))
//!     .clock(Arc::new(SystemClock))
//!     .build()?;
//!     Ok(service)
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

/// Authentication components, ports, and adapters
pub mod auth;

/// Role-based access control
pub mod rbac;

pub use auth::{AuthError, AuthFailure, AuthPolicy, Clock};
pub use rbac::{Role, RoleSet};

/// Embedded migrations for the PostgreSQL adapters.
#[cfg(feature = "database")]
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
