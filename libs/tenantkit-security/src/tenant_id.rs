use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

/// Upper bound on the number of characters in a tenant identifier.
pub const MAX_TENANT_ID_LEN: usize = 128;

/// Opaque, stable tenant identifier.
///
/// Any non-empty string of at most [`MAX_TENANT_ID_LEN`] characters without
/// whitespace or control characters. UUIDs render into valid identifiers.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum InvalidTenantId {
    #[error("tenant id is empty")]
    Empty,
    #[error("tenant id is longer than {MAX_TENANT_ID_LEN} characters")]
    TooLong,
    #[error("tenant id contains whitespace or control characters")]
    IllegalCharacter,
}

impl TenantId {
    /// Validate and wrap a tenant identifier.
    ///
    /// # Errors
    /// Returns [`InvalidTenantId`] when the value is empty, too long, or
    /// contains whitespace or control characters.
    pub fn new(value: impl Into<String>) -> Result<Self, InvalidTenantId> {
        let value = value.into();
        if value.is_empty() {
            return Err(InvalidTenantId::Empty);
        }
        if value.chars().count() > MAX_TENANT_ID_LEN {
            return Err(InvalidTenantId::TooLong);
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(InvalidTenantId::IllegalCharacter);
        }
        Ok(Self(value))
    }

    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Uuid> for TenantId {
    fn from(id: Uuid) -> Self {
        Self(id.to_string())
    }
}

impl TryFrom<String> for TenantId {
    type Error = InvalidTenantId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for TenantId {
    type Error = InvalidTenantId;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for TenantId {
    type Err = InvalidTenantId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
