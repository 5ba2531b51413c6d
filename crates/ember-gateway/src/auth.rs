//! Control-plane authentication: a service bearer token plus the tenant
//! the request acts for.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use ember_core::types::TenantId;

use crate::app::{ApiError, AppState};

/// Extractor for an authenticated tenant.
///
/// Requires `Authorization: Bearer <SERVICE_AUTH_TOKEN>` and an
/// `X-Tenant-Id` header naming the tenant the call operates on.
pub struct AuthedTenant(pub TenantId);

impl FromRequestParts<Arc<AppState>> for AuthedTenant {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or_else(ApiError::unauthorized)?;
        if bearer != state.config.security.service_auth_token {
            return Err(ApiError::unauthorized());
        }

        let tenant = parts
            .headers
            .get("x-tenant-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ApiError::bad_request("X-Tenant-Id header required"))?;
        Ok(AuthedTenant(TenantId::from(tenant)))
    }
}
