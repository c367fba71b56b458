//! Authentication for Warden-backed applications
//!
//! Password login issues a short-lived signed access token plus an opaque
//! refresh token belonging to a rotation family. Refresh tokens rotate on
//! every use and replaying a superseded one revokes the whole family. One-time
//! codes cover email verification, step-up and password reset.

pub mod clock;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use crypto::{CredentialHasher, CryptoError, HasherParams, TokenDigester, digests_match};
pub use error::{AuthError, AuthFailure};
pub use policy::{
    AuthPolicy, LockoutPolicy, OtpPolicy, PasswordPolicy, PasswordPolicyCheck, PasswordPolicyRule,
    TokenPolicy,
};
