use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
}

/// Payload of an access token as far as authorization is concerned.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub permissions: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub roles: Vec<String>,
}

// `null` reads as an empty list, like a missing key.
fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

impl Claims {
    /// Decodes the payload segment of a `header.payload.signature` token.
    ///
    /// # Errors
    /// Returns an error if the token does not have three segments or the payload
    /// is not base64url-encoded JSON.
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut parts = token.split('.');
        let _header = parts.next().ok_or(ClaimsError::TokenFormat)?;
        let payload = parts.next().ok_or(ClaimsError::TokenFormat)?;
        let _signature = parts.next().ok_or(ClaimsError::TokenFormat)?;
        if parts.next().is_some() {
            return Err(ClaimsError::TokenFormat);
        }

        // Some issuers pad their segments.
        let payload = payload.trim_end_matches('=');
        let bytes = Base64UrlUnpadded::decode_vec(payload).map_err(|_| ClaimsError::Base64)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
