//! Request shape validation. Every write path runs one of these before touching
//! the repository; failures come back as a list of per-field errors.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use crate::models::{Id, Role};

pub const MIN_PASSWORD_LEN: u64 = 8;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self { field: field.to_string(), message: message.into() }
    }
}

pub type Validated<T> = Result<T, Vec<FieldError>>;

fn collect(errs: &ValidationErrors) -> Vec<FieldError> {
    let mut out: Vec<FieldError> = errs
        .field_errors()
        .into_iter()
        .flat_map(|(field, list)| {
            list.iter().map(move |e| FieldError {
                field: field.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    out.sort_by(|a, b| a.field.cmp(&b.field));
    out
}

fn run<T: Validate>(req: &T) -> Vec<FieldError> {
    match req.validate() {
        Ok(()) => Vec::new(),
        Err(e) => collect(&e),
    }
}

// ---------------- signup -------------------------------------------------

#[derive(Debug, Default, Clone, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 30, message = "must be between 3 and 30 characters"))]
    pub username: String,
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 8, message = "must be at least 8 characters"))]
    pub password: String,
    /// One of `reader`, `author`, `admin`. Defaults to `reader`.
    pub role: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ValidSignup {
    pub username: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

pub fn validate_signup(req: &SignupRequest) -> Validated<ValidSignup> {
    let mut errors = run(req);

    // letters, digits and underscores only (length is covered above)
    if !req.username.is_empty()
        && !req.username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        errors.push(FieldError::new("username", "may only contain letters, digits and underscores"));
    }

    let role = match req.role.as_deref() {
        None | Some("") => Role::default(),
        Some(raw) => raw.parse().unwrap_or_else(|msg: String| {
            errors.push(FieldError::new("role", msg));
            Role::default()
        }),
    };

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(ValidSignup {
        username: req.username.clone(),
        email: normalize_email(&req.email),
        password: req.password.clone(),
        role,
    })
}

// ---------------- login --------------------------------------------------

#[derive(Debug, Default, Clone, Deserialize, Validate, ToSchema)]
#[serde(default)]
pub struct LoginRequest {
    #[validate(email(message = "must be a valid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "is required"))]
    pub password: String,
}

pub fn validate_login(req: &LoginRequest) -> Validated<(String, String)> {
    let errors = run(req);
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok((normalize_email(&req.email), req.password.clone()))
}

// ---------------- password reset -----------------------------------------

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(default)]
pub struct ForgetPasswordRequest {
    pub email: String,
}

#[derive(Debug, Default, Clone, Deserialize, ToSchema)]
#[serde(default)]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
}

pub fn validate_new_password(password: &str) -> Validated<()> {
    if (password.chars().count() as u64) < MIN_PASSWORD_LEN {
        return Err(vec![FieldError::new(
            "password",
            format!("must be at least {MIN_PASSWORD_LEN} characters"),
        )]);
    }
    Ok(())
}

// ---------------- comments -----------------------------------------------

#[derive(Debug, Default, Clone, Deserialize, Validate, ToSchema)]
#[serde(default, rename_all = "camelCase")]
pub struct NewCommentRequest {
    #[validate(length(min = 1, max = 2000, message = "must be between 1 and 2000 characters"))]
    pub text: String,
    /// Id of the comment being replied to; absent for a new thread.
    pub parent_comment: Option<Id>,
}

pub fn validate_comment(req: &NewCommentRequest) -> Validated<(String, Option<Id>)> {
    let mut errors = run(req);
    if !req.text.is_empty() && req.text.trim().is_empty() {
        errors.push(FieldError::new("text", "must not be blank"));
    }
    if !errors.is_empty() {
        return Err(errors);
    }
    Ok((req.text.trim().to_string(), req.parent_comment))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
