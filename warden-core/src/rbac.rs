//! Role-Based Access Control (RBAC)
//!
//! Roles live in a flat namespace. An identity holds a [`RoleSet`] and a
//! protected operation names the role (or roles) it needs. Checks are plain
//! set membership: there is no hierarchy and no wildcard, so `Admin` does not
//! implicitly satisfy a requirement for `Editor`.
//!
//! ## Example
//!
//! ```
//! use warden_core::rbac::{self, Role, RoleSet};
//!
//! let claimed = RoleSet::from_names(["user", "admin"]);
//! assert!(rbac::authorize(&claimed, Role::Admin));
//! assert!(!rbac::authorize(&RoleSet::from([Role::User]), Role::Admin));
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Closed set of roles known to the system.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Editor,
    User,
    Guest,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Editor, Role::User, Role::Guest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Editor => "editor",
            Role::User => "user",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "editor" => Ok(Role::Editor),
            "user" => Ok(Role::User),
            "guest" => Ok(Role::Guest),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Set of roles held by an identity or claimed by a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve role names, dropping any the system does not know. An unknown
    /// name can therefore never satisfy a check.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut roles = BTreeSet::new();
        for name in names {
            match name.as_ref().parse::<Role>() {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(err) => debug!(%err, "ignoring unrecognised role"),
            }
        }
        Self(roles)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn remove(&mut self, role: Role) -> bool {
        self.0.remove(&role)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn names(&self) -> Vec<String> {
        self.iter().map(|role| role.as_str().to_string()).collect()
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        Self(BTreeSet::from(roles))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<T: IntoIterator<Item = Role>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for RoleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, role) in self.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            f.write_str(role.as_str())?;
        }
        Ok(())
    }
}

/// True iff `required` is among the claimed roles.
pub fn authorize(claimed: &RoleSet, required: Role) -> bool {
    claimed.contains(required)
}

/// True iff the claimed and required sets intersect. An empty requirement is
/// never satisfied.
pub fn authorize_any(claimed: &RoleSet, required: &RoleSet) -> bool {
    required.iter().any(|role| claimed.contains(role))
}

/// True iff every required role is claimed.
pub fn authorize_all(claimed: &RoleSet, required: &RoleSet) -> bool {
    required.iter().all(|role| claimed.contains(role))
}
