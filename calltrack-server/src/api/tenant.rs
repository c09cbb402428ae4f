//! Tenant identity extractor
//!
//! Authentication happens upstream; the gateway forwards the resolved tenant
//! in the `X-Tenant-Id` header.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use uuid::Uuid;

use crate::error::ApiError;

pub const TENANT_HEADER: &str = "x-tenant-id";

/// Tenant the request acts for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TenantId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for TenantId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(TENANT_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-Tenant-Id header".into()))?
            .to_str()
            .map_err(|_| ApiError::BadRequest("X-Tenant-Id must be ASCII".into()))?;

        Uuid::parse_str(raw.trim())
            .map(TenantId)
            .map_err(|_| ApiError::BadRequest(format!("Invalid X-Tenant-Id: {}", raw)))
    }
}
