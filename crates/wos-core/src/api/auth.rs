/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! # Ingress principal extraction
//!
//! The HTTP surface is a thin ingress collaborator; this crate does not own
//! a token verifier. What it does own is turning whatever the caller
//! presented into a stable string key the rate limiter
//! can bucket on.
//! A real deployment swaps this extractor for one that verifies a bearer
//! token against its identity provider and returns the verified subject.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};

const PRINCIPAL_HEADER: &str = "x-principal";
const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// The caller identity used to key the rate limiter and stamp audit rows.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug)]
pub struct AuthError;

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(ANONYMOUS_PRINCIPAL)
            .to_string();
        Ok(Principal(principal))
    }
}
