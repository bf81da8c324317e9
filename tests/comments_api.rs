#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use quillpost::{
    config,
    models::{CommentThread, Role},
    repo::{inmem::InMemRepo, CommentRepo},
    AppState,
};
use serde_json::{json, Value};

mod common;
use common::{bearer, json_body, seed_user, test_config, MockMailer};

fn ids(v: &Value) -> Vec<i64> {
    v.as_array().unwrap().iter().map(|c| c["id"].as_i64().unwrap()).collect()
}

/// Every node's replies are exactly the comments naming it as parent.
fn check_thread(node: &CommentThread, all: &[quillpost::models::Comment]) {
    let mut expected: Vec<i64> = all
        .iter()
        .filter(|c| c.parent_comment == Some(node.id))
        .map(|c| c.id)
        .collect();
    let mut got: Vec<i64> = node.replies.iter().map(|r| r.id).collect();
    expected.sort_unstable();
    got.sort_unstable();
    assert_eq!(got, expected, "replies of {}", node.id);
    for r in &node.replies {
        assert_eq!(r.parent_comment, Some(node.id));
        check_thread(r, all);
    }
}

#[actix_web::test]
async fn comment_threads_over_http() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let ada = seed_user(&repo, "ada", Role::Author).await;
    let bob = seed_user(&repo, "bob", Role::Reader).await;
    let state = AppState::new(repo.clone(), Arc::new(MockMailer::default()), test_config());
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let post = |who: &quillpost::models::User, body: Value| {
        test::TestRequest::post()
            .uri("/api/v1/posts/7/comments")
            .insert_header(bearer(who))
            .set_json(body)
            .to_request()
    };

    // anonymous callers may not comment
    let req = test::TestRequest::post()
        .uri("/api/v1/posts/7/comments")
        .set_json(json!({"text": "hi"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let resp = test::call_service(&app, post(&ada, json!({"text": "  first!  "}))).await;
    assert_eq!(resp.status(), 201);
    let root = json_body(resp).await;
    assert_eq!(root["text"], "first!");
    assert_eq!(root["user"], ada.id);
    assert_eq!(root["post"], 7);
    assert!(root["parentComment"].is_null());
    assert!(root.get("replies").is_none());
    let root_id = root["id"].as_i64().unwrap();

    let resp = test::call_service(&app, post(&bob, json!({"text": "reply", "parentComment": root_id}))).await;
    assert_eq!(resp.status(), 201);
    let child_id = json_body(resp).await["id"].as_i64().unwrap();
    let resp = test::call_service(&app, post(&ada, json!({"text": "deeper", "parentComment": child_id}))).await;
    let grandchild_id = json_body(resp).await["id"].as_i64().unwrap();
    let resp = test::call_service(&app, post(&ada, json!({"text": "sibling", "parentComment": root_id}))).await;
    let sibling_id = json_body(resp).await["id"].as_i64().unwrap();

    // blank text and unknown parent
    let resp = test::call_service(&app, post(&bob, json!({"text": "   "}))).await;
    assert_eq!(resp.status(), 400);
    let resp = test::call_service(&app, post(&bob, json!({"text": "lost", "parentComment": 9999}))).await;
    assert_eq!(resp.status(), 404);
    assert_eq!(json_body(resp).await["message"], "Parent comment not found");

    // a reply cannot hop to another post
    let req = test::TestRequest::post()
        .uri("/api/v1/posts/8/comments")
        .insert_header(bearer(&bob))
        .set_json(json!({"text": "wrong post", "parentComment": root_id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    assert_eq!(json_body(resp).await["status"], "fail");
    let req = test::TestRequest::get().uri("/api/v1/posts/8/comments?threaded=true").to_request();
    assert_eq!(json_body(test::call_service(&app, req).await).await, json!([]));

    // flat listing, oldest first
    let req = test::TestRequest::get().uri("/api/v1/posts/7/comments").to_request();
    let flat = json_body(test::call_service(&app, req).await).await;
    assert_eq!(ids(&flat), vec![root_id, child_id, grandchild_id, sibling_id]);

    // a single comment carries no replies
    let req = test::TestRequest::get().uri(&format!("/api/v1/comments/{root_id}")).to_request();
    let single = json_body(test::call_service(&app, req).await).await;
    assert_eq!(single["id"], root_id);
    assert!(single.get("replies").is_none());

    let req = test::TestRequest::get().uri(&format!("/api/v1/comments/{root_id}/thread")).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let thread: CommentThread = serde_json::from_slice(&test::read_body(resp).await).unwrap();
    assert_eq!(thread.size(), 4);
    check_thread(&thread, &repo.list_comments(7).await.unwrap());

    let req = test::TestRequest::get().uri("/api/v1/posts/7/comments?threaded=true").to_request();
    let roots = json_body(test::call_service(&app, req).await).await;
    assert_eq!(ids(&roots), vec![root_id]);
    assert_eq!(ids(&roots[0]["replies"]), vec![child_id, sibling_id]);
    assert_eq!(ids(&roots[0]["replies"][0]["replies"]), vec![grandchild_id]);

    let req = test::TestRequest::get().uri("/api/v1/comments/424242").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
async fn only_admins_delete_comments() {
    let repo = Arc::new(InMemRepo::ephemeral());
    let admin = seed_user(&repo, "root", Role::Admin).await;
    let author = seed_user(&repo, "ada", Role::Author).await;
    let state = AppState::new(repo.clone(), Arc::new(MockMailer::default()), test_config());
    let app = test::init_service(App::new().app_data(web::Data::new(state)).configure(config)).await;

    let req = test::TestRequest::post()
        .uri("/api/v1/posts/1/comments")
        .insert_header(bearer(&author))
        .set_json(json!({"text": "mine"}))
        .to_request();
    let root_id = json_body(test::call_service(&app, req).await).await["id"].as_i64().unwrap();
    let req = test::TestRequest::post()
        .uri("/api/v1/posts/1/comments")
        .insert_header(bearer(&author))
        .set_json(json!({"text": "reply", "parentComment": root_id}))
        .to_request();
    let child_id = json_body(test::call_service(&app, req).await).await["id"].as_i64().unwrap();

    let delete = |who: Option<&quillpost::models::User>, id: i64| {
        let mut req = test::TestRequest::delete().uri(&format!("/api/v1/admin/comments/{id}"));
        if let Some(u) = who {
            req = req.insert_header(bearer(u));
        }
        req.to_request()
    };

    assert_eq!(test::call_service(&app, delete(None, root_id)).await.status(), 401);
    let resp = test::call_service(&app, delete(Some(&author), root_id)).await;
    assert_eq!(resp.status(), 403);
    assert_eq!(json_body(resp).await["status"], "fail");
    assert!(repo.get_comment(root_id).await.is_ok());

    assert_eq!(test::call_service(&app, delete(Some(&admin), root_id)).await.status(), 204);
    assert!(repo.get_comment(root_id).await.is_err());
    assert!(repo.get_comment(child_id).await.is_err());
    assert_eq!(test::call_service(&app, delete(Some(&admin), root_id)).await.status(), 404);
}
