pub mod aggregates;
pub mod events;
pub mod repositories;
pub mod services;
pub mod value_objects;

pub use aggregates::{Identity, IdentityStatus, OtpChallenge, TokenFamily};
pub use events::AuthEvent;
pub use repositories::{
    AuthEventRepository, IdentityRepository, NotificationService, OtpChallengeRepository,
    TokenFamilyRepository,
};
pub use value_objects::{OtpCode, OtpPurpose, RefreshToken, RevocationReason};
