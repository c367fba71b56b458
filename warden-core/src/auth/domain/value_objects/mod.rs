// Authentication value objects. Validated on construction and immutable
// afterwards; bearer material zeroizes on drop.

mod otp_code;
mod otp_purpose;
mod refresh_token;
mod revocation_reason;

pub use otp_code::{OtpCode, OtpCodeError};
pub use otp_purpose::{OtpPurpose, UnknownOtpPurpose};
pub use refresh_token::{RefreshToken, RefreshTokenError};
pub use revocation_reason::RevocationReason;
