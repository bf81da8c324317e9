use actix_web::{dev::Payload, web, FromRequest, HttpMessage, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::JwtConfig;
use crate::error::ApiError;
use crate::models::{Id, Role, User};
use crate::repo::RepoError;
use crate::routes::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: Id,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a session token for `user_id`.
pub fn issue_token(cfg: &JwtConfig, user_id: Id) -> Result<String, ApiError> {
    let now = chrono::Utc::now();
    let exp = chrono::Duration::from_std(cfg.expires_in)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            tracing::error!(expires_in = ?cfg.expires_in, "token lifetime out of range");
            ApiError::Internal
        })?;
    let claims = Claims {
        id: user_id,
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(cfg.secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("token signing failed: {e}");
        ApiError::Internal
    })
}

/// Validate a token (signature + expiry) and return its claims.
pub fn decode_token(cfg: &JwtConfig, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(cfg.secret.as_bytes()),
        &validation,
    )?;
    Ok(data.claims)
}

pub fn hash_password(password: &str, cost: u32) -> Result<String, ApiError> {
    bcrypt::hash(password, cost).map_err(|e| {
        tracing::error!("password hashing failed: {e}");
        ApiError::Internal
    })
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// 32 random bytes, hex encoded. Used for verification keys and reset tokens.
pub fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Reset tokens are stored as their SHA-256 digest only.
pub fn digest_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub(crate) fn bearer_token(req: &HttpRequest) -> Option<String> {
    BearerAuth::from_request(req, &mut Payload::None)
        .into_inner()
        .ok()
        .map(|b| b.token().to_string())
}

/// Resolve the caller behind a bearer token.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Result<User, ApiError> {
    let token = token.ok_or_else(|| {
        ApiError::Auth("You are not logged in! Please log in to get access.".into())
    })?;
    let claims = decode_token(&state.config.jwt, token)
        .map_err(|_| ApiError::Auth("Invalid or expired token".into()))?;
    let user = match state.repo.get_user(claims.id).await {
        Ok(user) => user,
        Err(RepoError::NotFound) => {
            return Err(ApiError::Auth("The user belonging to this token no longer exists".into()))
        }
        Err(e) => return Err(e.into()),
    };
    if user.changed_password_after(claims.iat) {
        return Err(ApiError::Auth("Password was changed recently. Please log in again.".into()));
    }
    Ok(user)
}

/// Fails with 403 unless `user.role` is one of `allowed`.
pub fn ensure_role(user: &User, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&user.role) {
        Ok(())
    } else {
        tracing::warn!(user_id = user.id, role = %user.role, "role not permitted");
        Err(ApiError::Forbidden)
    }
}

/// Extractor yielding the authenticated user. Reuses the user a [`crate::gate::RoleGate`]
/// already resolved for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

impl FromRequest for CurrentUser {
    type Error = actix_web::Error;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _pl: &mut Payload) -> Self::Future {
        let cached = req.extensions().get::<CurrentUser>().cloned();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        let token = bearer_token(req);
        Box::pin(async move {
            if let Some(user) = cached {
                return Ok(user);
            }
            let state = state.ok_or(ApiError::Internal)?;
            let user = authenticate(&state, token.as_deref()).await?;
            Ok(CurrentUser(user))
        })
    }
}
