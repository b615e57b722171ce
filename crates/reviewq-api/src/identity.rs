//! Caller identity extracted from request headers.
//!
//! Authentication itself happens upstream; this layer only reads the user id
//! and the API credential the request was made with. The credential is hashed
//! immediately and the plaintext is dropped.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use reviewq_core::CredentialHash;

use crate::error::ApiError;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub credential_hash: CredentialHash,
}

impl Caller {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, ApiError> {
        let user_id = header_str(headers, USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized(format!("missing {USER_ID_HEADER} header")))?;
        let credential = bearer_token(headers)
            .or_else(|| header_str(headers, API_KEY_HEADER))
            .ok_or_else(|| ApiError::Unauthorized("missing API credential".to_string()))?;

        Ok(Self {
            user_id: user_id.to_string(),
            credential_hash: CredentialHash::from_credential(credential),
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    header_str(headers, AUTHORIZATION.as_str())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Caller::from_headers(&parts.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_bearer_credential_is_hashed() {
        let caller = Caller::from_headers(&headers(&[
            ("x-user-id", "alice"),
            ("authorization", "Bearer sk-one"),
        ]))
        .unwrap();
        assert_eq!(caller.user_id, "alice");
        assert_eq!(caller.credential_hash, CredentialHash::from_credential("sk-one"));
    }

    #[test]
    fn test_api_key_header_fallback() {
        let caller = Caller::from_headers(&headers(&[
            ("x-user-id", "bob"),
            ("x-api-key", "sk-two"),
        ]))
        .unwrap();
        assert_eq!(caller.credential_hash, CredentialHash::from_credential("sk-two"));
    }

    #[test]
    fn test_missing_user_rejected() {
        let err = Caller::from_headers(&headers(&[("x-api-key", "k")])).unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[test]
    fn test_missing_or_blank_credential_rejected() {
        assert!(Caller::from_headers(&headers(&[("x-user-id", "a")])).is_err());
        assert!(Caller::from_headers(&headers(&[
            ("x-user-id", "a"),
            ("authorization", "Bearer "),
        ]))
        .is_err());
    }
}
