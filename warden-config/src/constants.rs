/// Placeholder values written into sample configs. Rejected outside dev mode.
pub const DEFAULT_PASSWORD_PEPPER: &str = "change-me-password-pepper";
pub const DEFAULT_TOKEN_SIGNING_KEY: &str = "change-me-token-signing-key";
pub const DEFAULT_TOKEN_DIGEST_KEY: &str = "change-me-token-digest-key";

pub const ENV_PASSWORD_PEPPER: &str = "WARDEN_PASSWORD_PEPPER";
pub const ENV_TOKEN_SIGNING_KEY: &str = "WARDEN_TOKEN_SIGNING_KEY";
pub const ENV_TOKEN_DIGEST_KEY: &str = "WARDEN_TOKEN_DIGEST_KEY";
pub const ENV_DEV_MODE: &str = "WARDEN_DEV_MODE";

/// Minimum length for any secret outside dev mode.
pub const MIN_SECRET_LENGTH: usize = 32;
