//! Per-backend credentials
//!
//! The auth context is owned by the caller (the widget or the HTTP layer)
//! and lent to every adapter call. Nothing in this crate stores or refreshes
//! tokens.

use crate::core::entity::SourceSystem;
use crate::core::error::{GeoError, ValidationError};
use axum::http::HeaderMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::OnceLock;

pub const HEADER_B24_DOMAIN: &str = "x-b24-domain";
pub const HEADER_B24_MEMBER_ID: &str = "x-b24-member-id";
pub const HEADER_B24_REFRESH_TOKEN: &str = "x-b24-refresh-token";
pub const HEADER_USERSIDE_AUTH: &str = "x-userside-auth";
pub const HEADER_UTM5_AUTH: &str = "x-utm5-auth";

/// CRM portal credentials as handed out by the embedding SDK
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrmAuth {
    pub domain: String,
    #[serde(default)]
    pub member_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

impl CrmAuth {
    pub fn new(domain: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Check the domain is a bare host (optionally with a port)
    pub fn validate(&self) -> Result<(), ValidationError> {
        static HOST: OnceLock<Regex> = OnceLock::new();
        let regex = HOST.get_or_init(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9.-]*[A-Za-z0-9])?(?::\d{1,5})?$").unwrap());
        if !regex.is_match(&self.domain) {
            return Err(ValidationError::FieldError {
                field: "domain".to_string(),
                message: format!("'{}' is not a host name", self.domain),
            });
        }
        if self.access_token.is_empty() {
            return Err(ValidationError::MissingArgument {
                argument: "access_token".to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for CrmAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrmAuth")
            .field("domain", &self.domain)
            .field("member_id", &self.member_id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Opaque `auth` object forwarded verbatim in Userside/UTM5 request bodies
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiAuth(pub Value);

impl ApiAuth {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Header values are JSON when they parse as JSON, plain strings otherwise
    fn from_header(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self(value),
            Err(_) => Self(Value::String(raw.to_string())),
        }
    }
}

impl fmt::Debug for ApiAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiAuth(<redacted>)")
    }
}

/// Credential bundle for one request
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub crm: Option<CrmAuth>,
    pub userside: Option<ApiAuth>,
    pub utm5: Option<ApiAuth>,
}

impl AuthContext {
    /// Context without any credentials
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_crm(mut self, auth: CrmAuth) -> Self {
        self.crm = Some(auth);
        self
    }

    pub fn with_userside(mut self, auth: ApiAuth) -> Self {
        self.userside = Some(auth);
        self
    }

    pub fn with_utm5(mut self, auth: ApiAuth) -> Self {
        self.utm5 = Some(auth);
        self
    }

    pub fn crm(&self) -> Result<&CrmAuth, GeoError> {
        self.crm.as_ref().ok_or(GeoError::Unauthorized {
            system: SourceSystem::Crm,
        })
    }

    pub fn userside(&self) -> Result<&ApiAuth, GeoError> {
        self.userside.as_ref().ok_or(GeoError::Unauthorized {
            system: SourceSystem::Userside,
        })
    }

    pub fn utm5(&self) -> Result<&ApiAuth, GeoError> {
        self.utm5.as_ref().ok_or(GeoError::Unauthorized {
            system: SourceSystem::Utm5,
        })
    }

    /// Build a context from request headers
    ///
    /// CRM credentials need both `X-B24-Domain` and `Authorization: Bearer`;
    /// a domain without a token (or the reverse) is rejected. Every other
    /// backend is optional.
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ValidationError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        let bearer = header(axum::http::header::AUTHORIZATION.as_str())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        let crm = match (header(HEADER_B24_DOMAIN), bearer) {
            (Some(domain), Some(token)) => {
                let auth = CrmAuth {
                    domain: domain.to_string(),
                    member_id: header(HEADER_B24_MEMBER_ID).unwrap_or_default().to_string(),
                    access_token: token.to_string(),
                    refresh_token: header(HEADER_B24_REFRESH_TOKEN)
                        .unwrap_or_default()
                        .to_string(),
                    expires_in: 0,
                };
                auth.validate()?;
                Some(auth)
            }
            (None, None) => None,
            (Some(_), None) => {
                return Err(ValidationError::MissingArgument {
                    argument: "Authorization".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(ValidationError::MissingArgument {
                    argument: HEADER_B24_DOMAIN.to_string(),
                });
            }
        };

        Ok(Self {
            crm,
            userside: header(HEADER_USERSIDE_AUTH).map(ApiAuth::from_header),
            utm5: header(HEADER_UTM5_AUTH).map(ApiAuth::from_header),
        })
    }
}
