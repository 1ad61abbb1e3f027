//! Bearer token decoding.
//!
//! Tokens are issued by the auth service; the gateway only checks the HS256 signature and
//! expiry and turns the claims into an [`AuthContext`].

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::AuthSettings;
use crate::core::error::{GatewayError, GatewayResult};
use crate::core::types::AuthContext;

/// Claims carried by platform access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Numeric or string user id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub authorities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctor_id: Option<Value>,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl TryFrom<Claims> for AuthContext {
    type Error = GatewayError;

    fn try_from(claims: Claims) -> Result<Self, Self::Error> {
        let user_id = claims
            .id
            .as_ref()
            .and_then(scalar_to_string)
            .or_else(|| claims.sub.clone().filter(|s| !s.is_empty()))
            .ok_or_else(|| GatewayError::unauthorized("Token carries no subject"))?;

        Ok(AuthContext {
            user_id,
            username: claims.username,
            role: claims.role.unwrap_or_else(|| "USER".to_string()),
            authorities: claims.authorities,
            doctor_id: claims.doctor_id.as_ref().and_then(scalar_to_string),
            expires_at: chrono::DateTime::from_timestamp(claims.exp, 0),
        })
    }
}

/// HS256 token decoder
pub struct JwtDecoder {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl JwtDecoder {
    pub fn new(settings: &AuthSettings) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        if let Some(issuer) = &settings.issuer {
            validation.set_issuer(&[issuer]);
        }

        Self {
            key: settings
                .jwt_secret
                .as_deref()
                .filter(|s| !s.is_empty())
                .map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            validation,
        }
    }

    /// False when no secret is configured; every caller is then anonymous
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    pub fn decode(&self, token: &str) -> GatewayResult<AuthContext> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| GatewayError::unauthorized("Token verification is not configured"))?;
        let data = decode::<Claims>(token, key, &self.validation)?;
        AuthContext::try_from(data.claims)
    }
}
