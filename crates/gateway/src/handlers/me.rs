//! Current user handler.

use crate::auth::TokenClaims;
use crate::middleware::CurrentUser;
use axum::{Extension, Json};
use common::types::UserIdentity;
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/v1/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// The directory record the token resolved to.
    pub user: UserIdentity,

    /// Scopes granted by the token.
    pub scopes: Vec<String>,

    /// Token expiration timestamp.
    pub exp: i64,
}

/// Handler for GET /api/v1/me
///
/// Requires the auth middleware.
///
/// ## Response
///
/// ```json
/// {
///   "user": { "id": "u-123", "email": "alice@example.com", "name": "Alice" },
///   "scopes": ["openid", "profile", "email"],
///   "exp": 1234567890
/// }
/// ```
#[instrument(skip_all, name = "gw.handlers.me")]
pub async fn get_me(
    CurrentUser(user): CurrentUser,
    Extension(claims): Extension<TokenClaims>,
) -> Json<MeResponse> {
    tracing::debug!(target: "gw.handlers.me", "Returning current user");

    Json(MeResponse {
        user,
        scopes: claims.scopes().into_iter().map(str::to_string).collect(),
        exp: claims.expires_at,
    })
}
