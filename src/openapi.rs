use crate::models::{Comment, CommentThread, Role, UserView};
use crate::routes::{MessageResponse, TokenResponse, UserEnvelope, UserResponse};
use crate::validation::{
    FieldError, ForgetPasswordRequest, LoginRequest, NewCommentRequest, ResetPasswordRequest, SignupRequest,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::signup,
        crate::routes::verify_email,
        crate::routes::login,
        crate::routes::forget_password,
        crate::routes::reset_password,
        crate::routes::me,
        crate::routes::create_comment,
        crate::routes::list_post_comments,
        crate::routes::get_comment,
        crate::routes::get_comment_thread,
        crate::routes::delete_comment,
    ),
    components(schemas(
        Role, UserView, Comment, CommentThread, FieldError,
        SignupRequest, LoginRequest, ForgetPasswordRequest, ResetPasswordRequest, NewCommentRequest,
        MessageResponse, TokenResponse, UserEnvelope, UserResponse
    )),
    tags(
        (name = "users", description = "Signup, verification, login and password reset"),
        (name = "comments", description = "Threaded comments"),
    )
)]
pub struct ApiDoc;
