pub mod access_guard;
pub mod authentication_service;
pub mod otp_engine;
pub mod session_store;
pub mod token_codec;

pub use access_guard::{AccessGuard, Principal};
pub use authentication_service::{
    AccessGrant, AuthenticationService, AuthenticationServiceBuilder, RefreshGrant,
    ServiceBuildError, SessionGrant,
};
pub use otp_engine::{IssuedChallenge, OtpEngine};
pub use session_store::{IssuedRefresh, RotationOutcome, SessionStore};
pub use token_codec::{ACCESS_TOKEN_TYPE, AccessClaims, SignedAccessToken, TokenCodec};
