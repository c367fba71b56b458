use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What a one-time code is allowed to prove. A code issued for one purpose
/// never verifies for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    EmailVerification,
    LoginStepUp,
    PasswordReset,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmailVerification => "email_verification",
            Self::LoginStepUp => "login_step_up",
            Self::PasswordReset => "password_reset",
        }
    }
}

impl fmt::Display for OtpPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown otp purpose: {0}")]
pub struct UnknownOtpPurpose(pub String);

impl FromStr for OtpPurpose {
    type Err = UnknownOtpPurpose;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_verification" => Ok(Self::EmailVerification),
            "login_step_up" => Ok(Self::LoginStepUp),
            "password_reset" => Ok(Self::PasswordReset),
            other => Err(UnknownOtpPurpose(other.to_string())),
        }
    }
}
