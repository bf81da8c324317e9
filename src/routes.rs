use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{digest_token, hash_password, issue_token, random_token, verify_password, CurrentUser};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::gate::restrict_to;
use crate::mail::{password_reset_email, verification_email, MailQueue, Mailer};
use crate::models::*;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::{Repo, RepoError};
use crate::thread::{load_post_threads, load_thread};
use crate::validation::*;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        ApiError::invalid(format!("Invalid request body: {err}")).into()
    }));
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::scope("/users")
                    .route("/signup", web::post().to(signup))
                    .route("/login", web::post().to(login))
                    .service(
                        web::resource("/verifyEmail/{key}")
                            .route(web::get().to(verify_email))
                            .route(web::post().to(verify_email)),
                    )
                    .route("/forgetPassword", web::post().to(forget_password))
                    .route("/resetPassword/{token}", web::patch().to(reset_password))
                    .route("/me", web::get().to(me)),
            )
            .service(
                web::resource("/posts/{post}/comments")
                    .route(web::get().to(list_post_comments))
                    .route(web::post().to(create_comment)),
            )
            .service(web::resource("/comments/{id}").route(web::get().to(get_comment)))
            .service(web::resource("/comments/{id}/thread").route(web::get().to(get_comment_thread)))
            .service(
                web::scope("/admin")
                    .wrap(restrict_to(&[Role::Admin]))
                    .route("/comments/{id}", web::delete().to(delete_comment)),
            ),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub mailer: Arc<dyn Mailer>,
    pub mail_queue: MailQueue,
    pub config: Arc<AppConfig>,
    pub rate_limiter: Option<RateLimiterFacade>,
}

impl AppState {
    /// Must run inside a tokio runtime: spawns the mail queue worker.
    pub fn new(repo: Arc<dyn Repo>, mailer: Arc<dyn Mailer>, config: AppConfig) -> Self {
        let (mail_queue, _worker) = MailQueue::spawn(mailer.clone());
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| RateLimiterFacade::new(config.rate_limit.clone()));
        Self { repo, mailer, mail_queue, config: Arc::new(config), rate_limiter }
    }
}

// ---------------- response bodies -------------------------------------

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub status: String,
    pub message: String,
}

impl MessageResponse {
    fn success(message: impl Into<String>) -> Self {
        Self { status: "success".into(), message: message.into() }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserEnvelope {
    pub data: UserView,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub status: String,
    pub token: String,
    pub data: UserEnvelope,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub status: String,
    pub data: UserEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct ThreadedQuery {
    #[serde(default)]
    pub threaded: bool,
}

// ---------------- helpers ---------------------------------------------

fn token_response(status: StatusCode, cfg: &AppConfig, user: &User) -> Result<HttpResponse, ApiError> {
    let token = issue_token(&cfg.jwt, user.id)?;
    Ok(HttpResponse::build(status).json(TokenResponse {
        status: "success".into(),
        token,
        data: UserEnvelope { data: UserView::from(user) },
    }))
}

fn or_not_found(message: &'static str) -> impl FnOnce(RepoError) -> ApiError {
    move |e| match e {
        RepoError::NotFound => ApiError::NotFound(message.into()),
        other => other.into(),
    }
}

fn throttle(
    data: &AppState,
    req: &HttpRequest,
    allow: fn(&RateLimiterFacade, &str) -> bool,
) -> Result<(), ApiError> {
    let Some(rl) = &data.rate_limiter else { return Ok(()) };
    // socket peer only; forwarding headers are client controlled
    let ip = req.peer_addr().map(|a| a.ip().to_string()).unwrap_or_else(|| "unknown".into());
    if !allow(rl, &ip) {
        tracing::warn!(%ip, path = req.path(), "rate limited");
        return Err(ApiError::TooManyRequests);
    }
    Ok(())
}

/// Origin for emailed links: the configured public URL, else the request's own host.
fn base_url(cfg: &AppConfig, req: &HttpRequest) -> String {
    if let Some(url) = &cfg.public_url {
        return url.clone();
    }
    let info = req.connection_info();
    format!("{}://{}", info.scheme(), info.host())
}

// ---------------- users -----------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/users/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "User created, verification email queued", body = MessageResponse),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Username or email already in use")
    )
)]
pub async fn signup(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<SignupRequest>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, &req, RateLimiterFacade::allow_signup)?;
    let valid = validate_signup(&payload).map_err(ApiError::from_fields)?;

    let key = random_token();
    let user = data
        .repo
        .create_user(NewUser {
            username: valid.username,
            email: valid.email,
            password_hash: hash_password(&valid.password, data.config.bcrypt_cost)?,
            role: valid.role,
            email_verify_key: Some(key.clone()),
        })
        .await?;
    tracing::info!(user_id = user.id, role = %user.role, "user signed up");

    // delivery is the queue worker's business; the caller never waits on it
    let link = format!("{}/api/v1/users/verifyEmail/{key}", base_url(&data.config, &req));
    if let Err(e) = data.mail_queue.enqueue(verification_email(&user.email, &link)) {
        tracing::error!(user_id = user.id, "could not queue verification email: {e}");
    }

    Ok(HttpResponse::Created().json(MessageResponse::success(format!("Sent an email to {}", user.email))))
}

#[utoipa::path(
    get,
    path = "/api/v1/users/verifyEmail/{key}",
    params(("key" = String, Path, description = "Verification key from the signup email")),
    responses(
        (status = 200, description = "Email verified, session token issued", body = TokenResponse),
        (status = 404, description = "Unknown or already used key")
    )
)]
pub async fn verify_email(data: web::Data<AppState>, path: web::Path<String>) -> Result<HttpResponse, ApiError> {
    let key = path.into_inner();
    let mut user = data
        .repo
        .find_user_by_verify_key(&key)
        .await
        .map_err(or_not_found("Invalid or already used verification key"))?;

    user.verified = true;
    user.email_verify_key = None;
    let user = data.repo.save_user(&user).await?;
    tracing::info!(user_id = user.id, "email verified");

    token_response(StatusCode::OK, &data.config, &user)
}

#[utoipa::path(
    post,
    path = "/api/v1/users/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = TokenResponse),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Incorrect email or password")
    )
)]
pub async fn login(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, &req, RateLimiterFacade::allow_login)?;
    let (email, password) = validate_login(&payload).map_err(ApiError::from_fields)?;

    let user = match data.repo.find_user_by_email(&email).await {
        Ok(user) => Some(user),
        Err(RepoError::NotFound) => None,
        Err(e) => return Err(e.into()),
    };
    let user = user
        .filter(|u| verify_password(&password, &u.password_hash))
        .ok_or_else(|| ApiError::Auth("Incorrect email or password!".into()))?;

    tracing::info!(user_id = user.id, "user logged in");
    token_response(StatusCode::OK, &data.config, &user)
}

#[utoipa::path(
    post,
    path = "/api/v1/users/forgetPassword",
    request_body = ForgetPasswordRequest,
    responses(
        (status = 200, description = "Reset link sent", body = MessageResponse),
        (status = 404, description = "No user with that email"),
        (status = 500, description = "Email could not be sent; token discarded")
    )
)]
pub async fn forget_password(
    req: HttpRequest,
    data: web::Data<AppState>,
    payload: web::Json<ForgetPasswordRequest>,
) -> Result<HttpResponse, ApiError> {
    throttle(&data, &req, RateLimiterFacade::allow_reset)?;
    let email = normalize_email(&payload.email);
    let mut user = data
        .repo
        .find_user_by_email(&email)
        .await
        .map_err(or_not_found("There is no user with that email address."))?;

    let ttl = data.config.reset_token_ttl;
    let token = random_token();
    user.password_reset_token = Some(digest_token(&token));
    let expires = chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_add_signed(ttl))
        .ok_or_else(|| {
            tracing::error!(?ttl, "reset token lifetime out of range");
            ApiError::Internal
        })?;
    user.password_reset_expires = Some(expires);
    let mut user = data.repo.save_user(&user).await?;

    let link = format!("{}/api/v1/users/resetPassword/{token}", base_url(&data.config, &req));
    let mail = password_reset_email(&user.email, &link, ttl.as_secs() / 60);
    if let Err(e) = data.mailer.send(&mail).await {
        tracing::error!(user_id = user.id, "password reset email failed: {e}");
        user.clear_reset_token();
        data.repo.save_user(&user).await?;
        return Err(ApiError::Server("There was an error sending the email. Try again later!".into()));
    }

    tracing::info!(user_id = user.id, "password reset token issued");
    Ok(HttpResponse::Ok().json(MessageResponse::success("Token sent to email!")))
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/resetPassword/{token}",
    params(("token" = String, Path, description = "Reset token from the email")),
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed, session token issued", body = TokenResponse),
        (status = 400, description = "Invalid or expired token, or missing password")
    )
)]
pub async fn reset_password(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: Option<web::Json<ResetPasswordRequest>>,
) -> Result<HttpResponse, ApiError> {
    let digest = digest_token(&path.into_inner());
    let mut user = data
        .repo
        .find_user_by_reset_token(&digest, Utc::now())
        .await
        .map_err(|e| match e {
            RepoError::NotFound => ApiError::Token("Invalid or expired token!".into()),
            other => other.into(),
        })?;

    let password = payload
        .and_then(|p| p.into_inner().password)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::invalid("Please provide a new password!"))?;
    validate_new_password(&password).map_err(ApiError::from_fields)?;

    user.clear_reset_token();
    user.password_hash = hash_password(&password, data.config.bcrypt_cost)?;
    user.password_changed_at = Some(Utc::now());
    let user = data.repo.save_user(&user).await?;
    tracing::info!(user_id = user.id, "password reset");

    token_response(StatusCode::OK, &data.config, &user)
}

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn me(user: CurrentUser) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(UserResponse {
        status: "success".into(),
        data: UserEnvelope { data: UserView::from(&user.0) },
    }))
}

// ---------------- comments --------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/posts/{post}/comments",
    params(("post" = i64, Path, description = "Post id")),
    request_body = NewCommentRequest,
    responses(
        (status = 201, description = "Comment created", body = Comment),
        (status = 400, description = "Validation failed"),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Parent comment not found")
    )
)]
pub async fn create_comment(
    user: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewCommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let (text, parent_comment) = validate_comment(&payload).map_err(ApiError::from_fields)?;
    let comment = data
        .repo
        .create_comment(NewComment { text, post: path.into_inner(), user: user.0.id, parent_comment })
        .await
        .map_err(or_not_found("Parent comment not found"))?;
    Ok(HttpResponse::Created().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/v1/posts/{post}/comments",
    params(
        ("post" = i64, Path, description = "Post id"),
        ("threaded" = Option<bool>, Query, description = "Return root threads with replies")
    ),
    responses(
        (status = 200, description = "Flat comments, or threads when threaded=true", body = [Comment])
    )
)]
pub async fn list_post_comments(
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<ThreadedQuery>,
) -> Result<HttpResponse, ApiError> {
    let post = path.into_inner();
    if query.threaded {
        let threads = load_post_threads(data.repo.as_ref(), post).await?;
        return Ok(HttpResponse::Ok().json(threads));
    }
    let comments = data.repo.list_comments(post).await?;
    Ok(HttpResponse::Ok().json(comments))
}

#[utoipa::path(
    get,
    path = "/api/v1/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment without replies", body = Comment),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn get_comment(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let comment = data
        .repo
        .get_comment(path.into_inner())
        .await
        .map_err(or_not_found("Comment not found"))?;
    Ok(HttpResponse::Ok().json(comment))
}

#[utoipa::path(
    get,
    path = "/api/v1/comments/{id}/thread",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 200, description = "Comment with replies at every depth", body = CommentThread),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn get_comment_thread(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let thread = load_thread(data.repo.as_ref(), path.into_inner())
        .await
        .map_err(or_not_found("Comment not found"))?;
    Ok(HttpResponse::Ok().json(thread))
}

#[utoipa::path(
    delete,
    path = "/api/v1/admin/comments/{id}",
    params(("id" = i64, Path, description = "Comment id")),
    responses(
        (status = 204, description = "Comment and its replies deleted"),
        (status = 403, description = "Forbidden - admins only"),
        (status = 404, description = "Comment not found")
    )
)]
pub async fn delete_comment(
    user: CurrentUser,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.delete_comment(id).await.map_err(or_not_found("Comment not found"))?;
    tracing::info!(comment_id = id, by = user.0.id, "comment thread deleted");
    Ok(HttpResponse::NoContent().finish())
}
