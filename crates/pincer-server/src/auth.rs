//! Lightweight auth middleware for self-host deployments.
//!
//! This keeps request-level user context optional:
//! - No auth headers => single-tenant local mode, owner id `"local"`.
//! - `X-User-Id` => scoped multi-user mode, used as the thread/action owner.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::AppState;

/// Default owner id for requests with no `X-User-Id` header.
pub const LOCAL_OWNER_ID: &str = "local";

/// User context attached to request extensions by middleware.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub owner_id: String,
}

impl AuthenticatedUser {
    pub fn local() -> Self {
        Self {
            owner_id: LOCAL_OWNER_ID.to_string(),
        }
    }
}

/// Extractor for routes that want user context.
pub struct CurrentUser(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or((StatusCode::UNAUTHORIZED, "Not authenticated"))
    }
}

/// Middleware that attaches optional user info to request extensions.
pub async fn auth_middleware(
    State(_state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut user = AuthenticatedUser::local();

    if let Some(owner_id) = request
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
    {
        user.owner_id = owner_id.to_string();
    }

    request.extensions_mut().insert(user);
    next.run(request).await
}
