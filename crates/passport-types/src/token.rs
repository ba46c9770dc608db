use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-chosen identifier that routes a handshake result back to its waiter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CorrelationToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Number of leading characters shown when a credential is printed.
const CREDENTIAL_PREVIEW_CHARS: usize = 4;

/// Opaque credential issued by an identity provider.
///
/// `Debug` and `Display` only show a short prefix. Use [`CredentialToken::expose`]
/// to get the full value when handing it to the requester.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialToken(String);

impl CredentialToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the full secret value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Short, log-safe rendering of the token.
    pub fn redacted(&self) -> String {
        let chars = self.0.chars().count();
        if chars <= CREDENTIAL_PREVIEW_CHARS * 2 {
            return "***".to_string();
        }
        let prefix: String = self.0.chars().take(CREDENTIAL_PREVIEW_CHARS).collect();
        format!("{prefix}***")
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CredentialToken")
            .field(&self.redacted())
            .finish()
    }
}

impl fmt::Display for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

impl From<&str> for CredentialToken {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CredentialToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Set of permission strings a provider must grant.
///
/// Serialized as a sorted list. Deserializing goes through the same
/// trimming as `insert`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PermissionScope(BTreeSet<String>);

impl PermissionScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a permission; blank entries are ignored.
    pub fn insert(&mut self, permission: impl Into<String>) {
        let permission = permission.into();
        let trimmed = permission.trim();
        if !trimmed.is_empty() {
            self.0.insert(trimmed.to_string());
        }
    }

    pub fn contains(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Joins the permissions with `sep` in sorted order.
    pub fn join(&self, sep: &str) -> String {
        self.iter().collect::<Vec<_>>().join(sep)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionScope {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut scope = PermissionScope::new();
        for permission in iter {
            scope.insert(permission);
        }
        scope
    }
}

impl From<Vec<String>> for PermissionScope {
    fn from(permissions: Vec<String>) -> Self {
        permissions.into_iter().collect()
    }
}

impl From<PermissionScope> for Vec<String> {
    fn from(scope: PermissionScope) -> Self {
        scope.0.into_iter().collect()
    }
}
