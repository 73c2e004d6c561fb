//! Roles and role sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A named capability bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Unverified,
    Patient,
    Nurse,
    Provider,
    Pharmacy,
    Admin,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Unverified,
        Role::Patient,
        Role::Nurse,
        Role::Provider,
        Role::Pharmacy,
        Role::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Unverified => "unverified",
            Role::Patient => "patient",
            Role::Nurse => "nurse",
            Role::Provider => "provider",
            Role::Pharmacy => "pharmacy",
            Role::Admin => "admin",
        }
    }

    /// Roles a member can earn by running the verification pipeline.
    pub fn is_requestable(&self) -> bool {
        matches!(
            self,
            Role::Patient | Role::Nurse | Role::Provider | Role::Pharmacy
        )
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unverified" => Ok(Role::Unverified),
            "patient" => Ok(Role::Patient),
            "nurse" => Ok(Role::Nurse),
            "provider" => Ok(Role::Provider),
            "pharmacy" => Ok(Role::Pharmacy),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

/// The roles one member holds. Effective capabilities are the union over it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleSet(BTreeSet<Role>);

impl RoleSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn single(role: Role) -> Self {
        Self(BTreeSet::from([role]))
    }

    /// Normalize a legacy role string ("provider" or "patient,nurse").
    ///
    /// Unknown names are dropped, never mapped to a guess.
    pub fn parse_legacy(raw: &str) -> Self {
        let mut roles = BTreeSet::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            match part.parse::<Role>() {
                Ok(role) => {
                    roles.insert(role);
                }
                Err(_) => tracing::warn!(role = %part, "Dropping unknown legacy role"),
            }
        }
        Self(roles)
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    /// Returns false when the role was already held.
    pub fn insert(&mut self, role: Role) -> bool {
        self.0.insert(role)
    }

    pub fn remove(&mut self, role: Role) -> bool {
        self.0.remove(&role)
    }

    pub fn union(&self, other: &RoleSet) -> RoleSet {
        Self(self.0.union(&other.0).copied().collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Role; N]> for RoleSet {
    fn from(roles: [Role; N]) -> Self {
        roles.into_iter().collect()
    }
}
