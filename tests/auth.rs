#![cfg(feature = "inmem-store")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use actix_web::{dev::Payload, test, web, App, FromRequest, HttpResponse};
use quillpost::{
    auth::{issue_token, CurrentUser},
    mail::LogMailer,
    models::Role,
    repo::{inmem::InMemRepo, UserRepo},
    restrict_to, AppState,
};

mod common;
use common::{bearer, seed_user, test_config, SECRET};

#[actix_web::test]
async fn extractor_resolves_token_owner() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let ada = seed_user(&repo, "ada", Role::Reader).await;
    let state = web::Data::new(AppState::new(repo.clone(), Arc::new(LogMailer), test_config()));

    let req = test::TestRequest::default()
        .app_data(state)
        .insert_header(bearer(&ada))
        .to_http_request();
    let mut pl = Payload::None;
    let user = CurrentUser::from_request(&req, &mut pl).await.expect("extract");
    assert_eq!(user.0.id, ada.id);
    assert_eq!(user.0.username, "ada");
}

#[actix_web::test]
async fn extractor_rejects_invalid_or_missing_token() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let state = web::Data::new(AppState::new(repo, Arc::new(LogMailer), test_config()));

    let req = test::TestRequest::default()
        .app_data(state.clone())
        .insert_header(("Authorization", "Bearer notatoken"))
        .to_http_request();
    assert!(CurrentUser::from_request(&req, &mut Payload::None).await.is_err());

    let req = test::TestRequest::default().app_data(state).to_http_request();
    assert!(CurrentUser::from_request(&req, &mut Payload::None).await.is_err());
}

#[actix_web::test]
async fn token_for_deleted_user_is_rejected() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let state = web::Data::new(AppState::new(repo, Arc::new(LogMailer), test_config()));
    let ghost = issue_token(&test_config().jwt, 4242).unwrap();

    let req = test::TestRequest::default()
        .app_data(state)
        .insert_header(("Authorization", format!("Bearer {ghost}")))
        .to_http_request();
    assert!(CurrentUser::from_request(&req, &mut Payload::None).await.is_err());
}

#[actix_web::test]
async fn token_issued_before_password_change_is_rejected() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let mut ada = seed_user(&repo, "ada", Role::Reader).await;
    let state = web::Data::new(AppState::new(repo.clone(), Arc::new(LogMailer), test_config()));
    let old = bearer(&ada);

    ada.password_changed_at = Some(chrono::Utc::now() + chrono::Duration::seconds(5));
    repo.save_user(&ada).await.unwrap();

    let req = test::TestRequest::default().app_data(state).insert_header(old).to_http_request();
    assert!(CurrentUser::from_request(&req, &mut Payload::None).await.is_err());
}

#[actix_web::test]
async fn expired_token_is_rejected() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let ada = seed_user(&repo, "ada", Role::Reader).await;
    let state = web::Data::new(AppState::new(repo.clone(), Arc::new(LogMailer), test_config()));

    // jsonwebtoken allows 60s of leeway, so sign one that expired well before that
    let claims = quillpost::auth::Claims {
        id: ada.id,
        iat: chrono::Utc::now().timestamp() - 7200,
        exp: chrono::Utc::now().timestamp() - 3600,
    };
    let token = jsonwebtoken::encode(
        &jsonwebtoken::Header::default(),
        &claims,
        &jsonwebtoken::EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap();
    let req = test::TestRequest::default()
        .app_data(state)
        .insert_header(("Authorization", format!("Bearer {token}")))
        .to_http_request();
    assert!(CurrentUser::from_request(&req, &mut Payload::None).await.is_err());
}

#[actix_web::test]
async fn role_gate_blocks_before_handler_runs() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let reader = seed_user(&repo, "reader", Role::Reader).await;
    let state = web::Data::new(AppState::new(repo.clone(), Arc::new(LogMailer), test_config()));
    let hits = Arc::new(AtomicUsize::new(0));

    let admin_hits = hits.clone();
    let reader_hits = hits.clone();
    let app = test::init_service(
        App::new()
            .app_data(state)
            .service(
                web::scope("/admin-only")
                    .wrap(restrict_to(&[Role::Admin]))
                    .route("", web::get().to(move || {
                        admin_hits.fetch_add(1, Ordering::SeqCst);
                        async { HttpResponse::Ok().finish() }
                    })),
            )
            .service(
                web::scope("/readers")
                    .wrap(restrict_to(&[Role::Reader]))
                    .route("", web::get().to(move |user: CurrentUser| {
                        reader_hits.fetch_add(1, Ordering::SeqCst);
                        async move { HttpResponse::Ok().body(user.0.username) }
                    })),
            ),
    )
    .await;

    // reader hitting an admin route: 403, handler never invoked
    let req = test::TestRequest::get().uri("/admin-only").insert_header(bearer(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 403);
    let body: serde_json::Value = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(body["status"], "fail");
    assert_eq!(hits.load(Ordering::SeqCst), 0);

    // reader hitting a reader route: passes through, user handed on to the handler
    let req = test::TestRequest::get().uri("/readers").insert_header(bearer(&reader)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(test::read_body(resp).await, "reader");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    // no token at all: 401, still not invoked
    let req = test::TestRequest::get().uri("/admin-only").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
