pub mod auth_event_repository;
pub mod identity_repository;
pub mod notification_service;
pub mod otp_challenge_repository;
pub mod token_family_repository;

#[cfg(feature = "database")]
#[cfg_attr(docsrs, doc(cfg(feature = "database")))]
pub mod postgres;

pub use auth_event_repository::InMemoryAuthEventRepository;
pub use identity_repository::InMemoryIdentityRepository;
pub use notification_service::LoggingNotificationService;
pub use otp_challenge_repository::InMemoryOtpChallengeRepository;
pub use token_family_repository::InMemoryTokenFamilyRepository;

#[cfg(feature = "database")]
pub use postgres::{
    PostgresAuthEventRepository, PostgresIdentityRepository, PostgresOtpChallengeRepository,
    PostgresTokenFamilyRepository,
};
