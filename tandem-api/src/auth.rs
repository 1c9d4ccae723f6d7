use axum::{extract::State, routing::post, Json, Router};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tandem_domain::booking::ActorRole;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

impl Claims {
    pub fn actor_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub)
            .map_err(|_| AppError::AuthenticationError("malformed subject claim".into()))
    }

    pub fn actor_role(&self) -> Result<ActorRole, AppError> {
        match self.role.as_str() {
            "LEARNER" => Ok(ActorRole::Learner),
            "INSTRUCTOR" => Ok(ActorRole::Instructor),
            "ADMIN" => Ok(ActorRole::Admin),
            other => Err(AppError::AuthenticationError(format!(
                "unknown role {other}"
            ))),
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.role == "ADMIN" {
            Ok(())
        } else {
            Err(AppError::AuthorizationError("admin role required".into()))
        }
    }
}

/// Decode and verify a bearer token into its claims.
pub fn claims_from(token: &str, secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| AppError::AuthenticationError(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    user_id: Uuid,
    role: String,
}

#[derive(Debug, Serialize)]
struct TokenResponse {
    token: String,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/auth/token", post(issue_token))
}

/// Dev/test token issuance. Real identity verification lives outside this
/// service; any deployment fronted by it should disable this route.
async fn issue_token(
    State(state): State<AppState>,
    Json(req): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    if !matches!(req.role.as_str(), "LEARNER" | "INSTRUCTOR" | "ADMIN") {
        return Err(AppError::ValidationError(format!(
            "unknown role {}",
            req.role
        )));
    }
    let claims = Claims {
        sub: req.user_id.to_string(),
        role: req.role,
        exp: (Utc::now() + Duration::seconds(state.auth.expiration as i64)).timestamp() as usize,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(state.auth.secret.as_bytes()),
    )
    .map_err(|e| AppError::InternalServerError(format!("Token encoding failed: {}", e)))?;

    Ok(Json(TokenResponse { token }))
}
