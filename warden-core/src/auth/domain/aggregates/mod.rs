mod identity;
mod otp_challenge;
mod token_family;

pub use identity::{Identity, IdentityStatus};
pub use otp_challenge::OtpChallenge;
pub use token_family::TokenFamily;
