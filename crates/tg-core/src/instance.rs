// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenants, backend instances, and decrypted auth material.
//!
//! A [`BackendInstance`] is one configured third-party account belonging to
//! exactly one tenant. The encrypted credential blob lives in the store;
//! decrypted [`AuthMaterial`] only ever flows into an adapter's header
//! builder and never appears in logs or audit diffs.

use crate::model::BackendKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An isolated customer of the gateway. Created administratively, never
/// implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Opaque tenant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// How an instance authenticates against its backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthKind {
    /// Raw API token (GitHub PAT, Linear key, ClickUp token).
    ApiToken,
    /// OAuth bearer token (Jira OAuth, Asana PAT).
    Oauth,
    /// Basic auth from email + API token (Jira Cloud).
    Basic,
}

impl AuthKind {
    /// Wire identifier for this auth kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiToken => "api_token",
            Self::Oauth => "oauth",
            Self::Basic => "basic",
        }
    }

    /// Parse a wire identifier.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "api_token" => Some(Self::ApiToken),
            "oauth" => Some(Self::Oauth),
            "basic" => Some(Self::Basic),
            _ => None,
        }
    }
}

/// Decrypted credential material for one instance.
///
/// The `Debug` impl never prints secret fields; serialization is only used
/// by the credential cipher when sealing the blob for storage.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuthMaterial {
    /// Bearer token (`Authorization: Bearer <token>`).
    Oauth {
        /// The access token.
        access_token: String,
    },
    /// Email + API token pair sent as HTTP Basic auth.
    Basic {
        /// Account email.
        email: String,
        /// API token paired with the email.
        api_token: String,
    },
    /// Raw token whose header prefix is backend-specific.
    ApiToken {
        /// The token value.
        token: String,
    },
}

impl AuthMaterial {
    /// The [`AuthKind`] this material satisfies.
    #[must_use]
    pub fn kind(&self) -> AuthKind {
        match self {
            Self::Oauth { .. } => AuthKind::Oauth,
            Self::Basic { .. } => AuthKind::Basic,
            Self::ApiToken { .. } => AuthKind::ApiToken,
        }
    }
}

impl fmt::Debug for AuthMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Secret material must not leak through Debug formatting.
        write!(f, "AuthMaterial({})", self.kind().as_str())
    }
}

/// One configured third-party account, owned by one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendInstance {
    /// Instance identifier, unique within the tenant.
    pub id: Uuid,
    /// Owning tenant.
    pub tenant_id: Uuid,
    /// Which backend this instance talks to.
    pub kind: BackendKind,
    /// Base URL of the backend API.
    pub base_url: String,
    /// How the instance authenticates.
    pub auth_kind: AuthKind,
    /// Whether the instance may serve requests.
    pub active: bool,
    /// Last successful warehouse sync, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Rate-limit ceiling per window for this instance.
    pub rate_limit_per_window: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_material_debug_hides_secrets() {
        let material = AuthMaterial::Basic {
            email: "dev@example.com".into(),
            api_token: "super-secret".into(),
        };
        let printed = format!("{material:?}");
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("dev@example.com"));
        assert_eq!(printed, "AuthMaterial(basic)");
    }

    #[test]
    fn auth_material_serde_tagging() {
        let material = AuthMaterial::ApiToken {
            token: "tok".into(),
        };
        let json = serde_json::to_value(&material).unwrap();
        assert_eq!(json["kind"], serde_json::json!("api_token"));
        let back: AuthMaterial = serde_json::from_value(json).unwrap();
        assert_eq!(back, material);
    }
}
