//! Customer and agent identities as they appear on the wire.

use serde::{Deserialize, Serialize};

use crate::ids::CustomerId;

/// The customer (end user) on whose behalf the session runs.
///
/// `id_on_external_platform` is the stable key the backend uses to recognize
/// a returning customer; the name fields are optional display metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    /// Stable customer key on the external platform.
    pub id_on_external_platform: CustomerId,
    /// Optional given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    /// Optional family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl CustomerIdentity {
    /// Identity with a given key and no display name.
    #[must_use]
    pub fn new(id: CustomerId) -> Self {
        Self {
            id_on_external_platform: id,
            first_name: None,
            last_name: None,
        }
    }

    /// Space-joined display name, empty when neither part is set.
    #[must_use]
    pub fn full_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{first} {last}"),
            (Some(first), None) => first.clone(),
            (None, Some(last)) => last.clone(),
            (None, None) => String::new(),
        }
    }
}

/// A support agent as reported by the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    /// Backend-assigned numeric agent id.
    pub id: i64,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub surname: String,
    /// Optional display nickname, preferred over the legal name when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Whether this "agent" is an automation rather than a person.
    #[serde(default)]
    pub is_bot_user: bool,
    /// Avatar URL, when the brand configures one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl AgentIdentity {
    /// Display name: nickname when present, otherwise "first surname".
    #[must_use]
    pub fn display_name(&self) -> String {
        if let Some(nick) = &self.nickname {
            if !nick.is_empty() {
                return nick.clone();
            }
        }
        format!("{} {}", self.first_name, self.surname)
            .trim()
            .to_owned()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
