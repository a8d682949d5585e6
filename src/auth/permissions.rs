//! Claim-based access check.
//!
//! A requirement list is satisfied when the user holds at least one of the
//! listed entries, not all of them. Permissions and roles are checked
//! independently and both must pass.

use super::Claims;

/// Permissions and roles a page asks for. Empty lists impose nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Requirements {
    pub permissions: Vec<String>,
    pub roles: Vec<String>,
}

impl Requirements {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permissions = permissions.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty() && self.roles.is_empty()
    }

    #[must_use]
    pub fn allows(&self, user: Option<&Claims>) -> bool {
        evaluate(user, &self.permissions, &self.roles)
    }
}

/// Returns `true` when `user` holds any of `permissions` and any of `roles`.
///
/// An empty list is treated as "not required". A missing user is an empty claim
/// set, so it fails every non-empty requirement.
#[must_use]
pub fn evaluate(user: Option<&Claims>, permissions: &[String], roles: &[String]) -> bool {
    let empty = Claims::default();
    let user = user.unwrap_or(&empty);

    if !permissions.is_empty() && !holds_any(&user.permissions, permissions) {
        return false;
    }

    if !roles.is_empty() && !holds_any(&user.roles, roles) {
        return false;
    }

    true
}

fn holds_any(held: &[String], required: &[String]) -> bool {
    required.iter().any(|entry| held.contains(entry))
}
