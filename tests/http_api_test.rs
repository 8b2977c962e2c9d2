//! HTTP API Integration Tests
//!
//! Drives the actix routes against the in-memory store with signed tokens.
//!
//! Run: cargo test --test http_api_test

use actix_web::{http::StatusCode, test, web, App};
use realtime_messaging_service::routes;
use serde_json::{json, Value};
use uuid::Uuid;

mod test_harness;
use test_harness::TestEnvironment;

macro_rules! app {
    ($env:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($env.state.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn test_requests_without_valid_token_are_rejected() {
    let env = TestEnvironment::new();
    let app = app!(env);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/conversations").to_request()).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["status"], 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/conversations")
            .insert_header(("Authorization", "Bearer not-a-token"))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn test_conversation_message_lifecycle() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/conversations")
            .insert_header(env.bearer(a.id))
            .set_json(json!({"members": [b.id]}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let detail: Value = test::read_body_json(resp).await;
    assert_eq!(detail["isGroup"], json!(false));
    assert_eq!(detail["title"], "Beto");
    let chat: Uuid = serde_json::from_value(detail["id"].clone()).unwrap();

    // same pair from the other side resolves to the same chat
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/conversations")
            .insert_header(env.bearer(b.id))
            .set_json(json!({"members": [a.id]}))
            .to_request(),
    )
    .await;
    let again: Value = test::read_body_json(resp).await;
    assert_eq!(again["id"], json!(chat));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"body": "  hola  "}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let sent: Value = test::read_body_json(resp).await;
    assert_eq!(sent["body"], "hola");
    assert_eq!(sent["kind"], "normal");
    assert_eq!(sent["senderId"], json!(a.id));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"body": "   "}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let messages: Value = test::read_body_json(resp).await;
    assert_eq!(messages.as_array().unwrap().len(), 1);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/conversations/{chat}/markRead"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{chat}/states"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/conversations")
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    let listed: Value = test::read_body_json(resp).await;
    assert_eq!(listed[0]["id"], json!(chat));
    assert_eq!(listed[0]["unreadCount"], 0);
}

#[actix_web::test]
async fn test_outsider_cannot_read_conversation() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let outsider = env.user("+5215550000009", "Otro").await;
    let chat = env.direct(a.id, b.id).await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(outsider.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{}", Uuid::new_v4()))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error_type"], "not_found_error");
}

#[actix_web::test]
async fn test_message_edit_delete_and_reactions() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"body": "hola"}))
            .to_request(),
    )
    .await;
    let sent: Value = test::read_body_json(resp).await;
    let message = sent["id"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/messages/{message}"))
            .insert_header(env.bearer(b.id))
            .set_json(json!({"body": "hackeado"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/messages/{message}"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"body": "hola!"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let edited: Value = test::read_body_json(resp).await;
    assert_eq!(edited["body"], "hola!");
    assert!(!edited["editedAt"].is_null());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/messages/{message}/reactions?emoji=%F0%9F%91%8D"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let ok: Value = test::read_body_json(resp).await;
    assert_eq!(ok, json!({"ok": true}));

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/messages/{message}/reactions"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/messages/{message}?mode=bogus"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/messages/{message}?mode=everyone"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    let messages: Value = test::read_body_json(resp).await;
    assert_eq!(messages[0]["body"], "This message was deleted");
    assert!(!messages[0]["deletedAt"].is_null());
}

#[actix_web::test]
async fn test_group_member_management() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let d = env.user("+5215550000004", "Dani").await;
    let group = env.group(a.id, &[b.id], "Equipo").await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{group}/members/add"))
            .insert_header(env.bearer(b.id))
            .set_json(json!({"members": [d.id]}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{group}/members/add"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"members": [d.id, b.id]}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let added: Value = test::read_body_json(resp).await;
    assert_eq!(added["added"], json!([d.id]));

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/conversations/{group}/members/{}", d.id))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let removed: Value = test::read_body_json(resp).await;
    assert_eq!(removed["userId"], json!(d.id));
    assert!(removed.get("newAdminId").is_none());

    // admin leaving hands the group to the only other active member
    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/conversations/{group}/members/{}", a.id))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    let left: Value = test::read_body_json(resp).await;
    assert_eq!(left["newAdminId"], json!(b.id));

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri(&format!("/conversations/{group}/members"))
            .insert_header(env.bearer(b.id))
            .to_request(),
    )
    .await;
    let members: Value = test::read_body_json(resp).await;
    let b_row = members
        .as_array()
        .unwrap()
        .iter()
        .find(|m| m["id"] == json!(b.id))
        .cloned()
        .unwrap();
    assert_eq!(b_row["isAdmin"], json!(true));
}

#[actix_web::test]
async fn test_contacts_crud() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/contacts")
            .insert_header(env.bearer(a.id))
            .set_json(json!({"phone": b.phone, "alias": "Betito"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let contact: Value = test::read_body_json(resp).await;
    assert_eq!(contact["userId"], json!(b.id));
    assert_eq!(contact["displayName"], "Betito");
    let contact_id = contact["id"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/contacts")
            .insert_header(env.bearer(a.id))
            .set_json(json!({"phone": "+0000000000"}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = test::call_service(
        &app,
        test::TestRequest::put()
            .uri(&format!("/contacts/{contact_id}"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"alias": "Beto B."}))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let updated: Value = test::read_body_json(resp).await;
    assert_eq!(updated["displayName"], "Beto B.");

    let resp = test::call_service(
        &app,
        test::TestRequest::delete()
            .uri(&format!("/contacts/{contact_id}"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/contacts")
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    let contacts: Value = test::read_body_json(resp).await;
    assert!(contacts.as_array().unwrap().is_empty());
}

#[actix_web::test]
async fn test_attachment_upload_stores_file() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/attachments?filename=foto.jpg&body=mira"))
            .insert_header(env.bearer(a.id))
            .set_payload(&b"\xff\xd8\xff\xe0fake-jpeg"[..])
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let view: Value = test::read_body_json(resp).await;
    assert_eq!(view["kind"], "attachment");
    assert_eq!(view["body"], "mira");
    assert_eq!(view["attachment"]["category"], "images");
    assert_eq!(view["attachment"]["fileName"], "foto.jpg");
    assert_eq!(
        view["attachment"]["url"],
        "http://localhost:8000/uploads/images/foto.jpg"
    );
    assert!(env.upload_root().join("images").join("foto.jpg").exists());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/attachments?filename=vacio.txt"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn test_call_is_recorded_for_members() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let outsider = env.user("+5215550000009", "Otro").await;
    let chat = env.direct(a.id, b.id).await;
    let app = app!(env);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/calls?kind=video"))
            .insert_header(env.bearer(a.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let call: Value = test::read_body_json(resp).await;
    assert_eq!(call["state"], "started");
    assert!(call["callId"].is_string());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/calls"))
            .insert_header(env.bearer(outsider.id))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_health_and_metrics() {
    let env = TestEnvironment::new();
    let a = env.user("+5215550000001", "Ana").await;
    let b = env.user("+5215550000002", "Beto").await;
    let chat = env.direct(a.id, b.id).await;
    let app = app!(env);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let health: Value = test::read_body_json(resp).await;
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 0);

    test::call_service(
        &app,
        test::TestRequest::post()
            .uri(&format!("/conversations/{chat}/messages"))
            .insert_header(env.bearer(a.id))
            .set_json(json!({"body": "hola"}))
            .to_request(),
    )
    .await;

    let resp = test::call_service(&app, test::TestRequest::get().uri("/metrics").to_request()).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("messaging_messages_sent_total"));
}
