//! Common data types for VolunteerX services.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A user record as owned by the user-directory service.
///
/// Other services only ever hold a copy scoped to a single request. The
/// directory may attach any number of additional profile fields; they are
/// carried through untouched in `profile`.
///
/// The `email` field is redacted in Debug output to keep it out of logs.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// Opaque directory identifier.
    pub id: String,

    /// Primary email address - redacted in Debug output.
    pub email: String,

    /// Additional directory-owned fields (username, display name, ...).
    #[serde(flatten)]
    pub profile: serde_json::Map<String, serde_json::Value>,
}

impl UserIdentity {
    /// Create a user identity without extra profile fields.
    #[must_use]
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            profile: serde_json::Map::new(),
        }
    }
}

impl fmt::Debug for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserIdentity")
            .field("id", &self.id)
            .field("email", &"[REDACTED]")
            .field("profile_fields", &self.profile.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_email() {
        let user = UserIdentity::new("64b7f0c2", "alice@example.com");
        let debug_str = format!("{user:?}");

        assert!(!debug_str.contains("alice@example.com"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("64b7f0c2"));
    }

    #[test]
    fn test_deserialize_keeps_extra_fields() {
        let json = r#"{
            "id": "64b7f0c2",
            "email": "alice@example.com",
            "username": "alice",
            "verified": true
        }"#;

        let user: UserIdentity = serde_json::from_str(json).unwrap();

        assert_eq!(user.id, "64b7f0c2");
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.profile.get("username").unwrap(), "alice");
        assert_eq!(user.profile.get("verified").unwrap(), true);
    }

    #[test]
    fn test_serialize_flattens_profile() {
        let mut user = UserIdentity::new("1", "bob@example.com");
        user.profile
            .insert("username".to_string(), serde_json::json!("bob"));

        let value = serde_json::to_value(&user).unwrap();

        assert_eq!(value["username"], "bob");
        assert!(value.get("profile").is_none());
    }

    #[test]
    fn test_missing_email_is_rejected() {
        let result: Result<UserIdentity, _> = serde_json::from_str(r#"{"id": "1"}"#);
        assert!(result.is_err());
    }
}
