#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, web, App};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;
use videome::auth::UnconfiguredAuth;
use videome::config::AppConfig;
use videome::gateway::inmem::InMemGateway;
use videome::storage::inmem::MemoryStore;
use videome::storage::VIDEO_BUCKET;
use videome::upload::{FrameError, FrameGrabber};
use videome::{config, AppState};

const SECRET: &str = "test-jwt-secret-0123456789abcdef";

struct StillFrames;

#[async_trait::async_trait]
impl FrameGrabber for StillFrames {
    async fn duration_secs(&self, _video: &[u8]) -> Result<i64, FrameError> {
        Ok(65)
    }

    async fn frame_at(&self, _video: &[u8], _at_secs: f64) -> Result<Vec<u8>, FrameError> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'])
    }
}

#[derive(Serialize)]
struct Claims {
    sub: Uuid,
    email: String,
    aud: &'static str,
    exp: usize,
}

fn bearer(user: Uuid) -> (&'static str, String) {
    let claims = Claims {
        sub: user,
        email: "someone@example.com".into(),
        aud: "authenticated",
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

fn app_config(configured: bool) -> AppConfig {
    AppConfig::from_lookup(move |name| match name {
        "SUPABASE_URL" if configured => Some("https://demo.supabase.co".into()),
        "SUPABASE_ANON_KEY" if configured => Some("anon".into()),
        "SUPABASE_JWT_SECRET" => Some(SECRET.into()),
        _ => None,
    })
}

fn state(gw: &InMemGateway, store: &MemoryStore, configured: bool) -> web::Data<AppState> {
    web::Data::new(AppState {
        config: app_config(configured),
        gateway: Arc::new(gw.clone()),
        store: Arc::new(store.clone()),
        auth: Arc::new(UnconfiguredAuth::default()),
        frames: Arc::new(StillFrames),
    })
}

fn seed_channel(gw: &InMemGateway, username: &str) -> Uuid {
    let id = Uuid::new_v4();
    gw.seed("profiles", json!({ "id": id, "username": username, "created_at": "2024-01-01T00:00:00Z" }));
    id
}

fn seed_video(gw: &InMemGateway, owner: Uuid, public: bool) -> Uuid {
    let id = Uuid::new_v4();
    gw.seed(
        "videos",
        json!({ "id": id, "user_id": owner, "title": "clip", "is_public": public, "created_at": "2024-02-01T00:00:00Z" }),
    );
    id
}

macro_rules! app {
    ($gw:expr, $store:expr, $configured:expr) => {
        test::init_service(App::new().app_data(state(&$gw, &$store, $configured)).configure(config)).await
    };
}

#[actix_web::test]
async fn signed_out_pages_redirect_to_sign_in() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let app = app!(gw, store, true);

    for uri in ["/api/v1/pages/home", "/api/v1/pages/liked", "/api/v1/pages/settings"] {
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        assert_eq!(resp.status(), 303, "{uri}");
        assert_eq!(resp.headers().get("location").unwrap(), "/auth/signin");
    }

    // public pages need no session
    let resp = test::call_service(&app, test::TestRequest::get().uri("/api/v1/pages/help").to_request()).await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
async fn unconfigured_backend_serves_setup_guide() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let app = app!(gw, store, false);

    let req = test::TestRequest::get().uri("/api/v1/pages/home").insert_header(bearer(Uuid::new_v4())).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 503);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["missing"], json!(["SUPABASE_URL", "SUPABASE_ANON_KEY"]));

    let req = test::TestRequest::get().uri("/api/v1/pages/search?q=x").to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 503);
    assert!(gw.calls().is_empty());
}

#[actix_web::test]
async fn home_lists_public_videos() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let owner = seed_channel(&gw, "maker");
    seed_video(&gw, owner, true);
    seed_video(&gw, owner, false);
    let app = app!(gw, store, true);

    let req = test::TestRequest::get().uri("/api/v1/pages/home").insert_header(bearer(Uuid::new_v4())).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["videos"].as_array().unwrap().len(), 1);
    assert_eq!(body["videos"][0]["channel"]["username"], "maker");
}

#[actix_web::test]
async fn private_video_is_hidden_from_other_viewers() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let owner = seed_channel(&gw, "maker");
    let video = seed_video(&gw, owner, false);
    let app = app!(gw, store, true);

    let uri = format!("/api/v1/pages/watch/{video}");
    let req = test::TestRequest::get().uri(&uri).insert_header(bearer(Uuid::new_v4())).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::get().uri(&uri).insert_header(bearer(owner)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["viewer"]["is_owner"], true);
}

#[actix_web::test]
async fn like_then_dislike_keeps_one_reaction() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let owner = seed_channel(&gw, "maker");
    let video = seed_video(&gw, owner, true);
    let viewer = Uuid::new_v4();
    let app = app!(gw, store, true);

    let req = test::TestRequest::put().uri(&format!("/api/v1/videos/{video}/like")).insert_header(bearer(viewer)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["kind"], "like");
    assert_eq!(body["value"], true);

    let req = test::TestRequest::put().uri(&format!("/api/v1/videos/{video}/dislike")).insert_header(bearer(viewer)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["value"], true);

    let likes = gw.rows("video_likes");
    assert_eq!(likes.len(), 1);
    assert_eq!(likes[0]["is_like"], false);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/videos/{video}/dislike")).insert_header(bearer(viewer)).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["value"], false);
    assert!(gw.rows("video_likes").is_empty());
}

#[actix_web::test]
async fn failed_write_rolls_back_with_notification() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let video = seed_video(&gw, Uuid::new_v4(), true);
    gw.fail_on("upsert", "watch_later");
    let app = app!(gw, store, true);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/videos/{video}/watch-later"))
        .insert_header(bearer(Uuid::new_v4()))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 502);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["value"], false);
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn subscribing_to_yourself_is_rejected() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let me = seed_channel(&gw, "me");
    let app = app!(gw, store, true);

    let req = test::TestRequest::put().uri(&format!("/api/v1/channels/{me}/subscription")).insert_header(bearer(me)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);
    assert!(gw.rows("subscriptions").is_empty());
    assert!(gw.calls().is_empty());

    let other = seed_channel(&gw, "other");
    let req = test::TestRequest::put().uri(&format!("/api/v1/channels/{other}/subscription")).insert_header(bearer(me)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    assert_eq!(gw.rows("subscriptions").len(), 1);
}

#[actix_web::test]
async fn relation_endpoints_require_a_token() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let app = app!(gw, store, true);
    let req = test::TestRequest::put().uri(&format!("/api/v1/videos/{}/like", Uuid::new_v4())).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/videos/{}/like", Uuid::new_v4()))
        .insert_header(("Authorization", "Bearer not-a-jwt"))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);
}

#[actix_web::test]
async fn comments_post_and_list_newest_first() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let author = seed_channel(&gw, "author");
    let video = seed_video(&gw, author, true);
    let app = app!(gw, store, true);
    let uri = format!("/api/v1/videos/{video}/comments");

    let req = test::TestRequest::post().uri(&uri).insert_header(bearer(author)).set_json(json!({ "content": "   " })).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    for text in ["first", "second"] {
        let req = test::TestRequest::post().uri(&uri).insert_header(bearer(author)).set_json(json!({ "content": text })).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 201);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let comments: Value = test::call_and_read_body_json(&app, test::TestRequest::get().uri(&uri).to_request()).await;
    assert_eq!(comments[0]["content"], "second");
    assert_eq!(comments[1]["profiles"]["username"], "author");
}

#[actix_web::test]
async fn upload_then_delete_video() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let me = seed_channel(&gw, "me");
    let app = app!(gw, store, true);

    let boundary = "videome-boundary";
    let mut payload = Vec::new();
    for (name, value) in [("title", "Holiday"), ("tags", "sea, sun,"), ("is_public", "false")] {
        payload.extend_from_slice(
            format!("--{boundary}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n").as_bytes(),
        );
    }
    payload.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"holiday.mp4\"\r\nContent-Type: video/mp4\r\n\r\n"
        )
        .as_bytes(),
    );
    payload.extend_from_slice(&[0u8; 256]);
    payload.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let req = test::TestRequest::post()
        .uri("/api/v1/videos")
        .insert_header(bearer(me))
        .insert_header(("Content-Type", format!("multipart/form-data; boundary={boundary}")))
        .set_payload(payload)
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let report: Value = test::read_body_json(resp).await;
    assert_eq!(report["video"]["title"], "Holiday");
    assert_eq!(report["video"]["duration"], 65);
    assert_eq!(report["video"]["is_public"], false);
    assert_eq!(report["video"]["tags"], json!(["sea", "sun"]));
    assert_eq!(store.paths(VIDEO_BUCKET).len(), 1);

    let id = report["video"]["id"].as_str().unwrap().to_string();
    let req = test::TestRequest::delete().uri(&format!("/api/v1/videos/{id}")).insert_header(bearer(Uuid::new_v4())).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/videos/{id}")).insert_header(bearer(me)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    assert!(gw.rows("videos").is_empty());
    assert!(store.paths(VIDEO_BUCKET).is_empty());
}

#[actix_web::test]
async fn export_names_the_file_by_date() {
    let (gw, store) = (InMemGateway::new(), MemoryStore::new());
    let me = seed_channel(&gw, "me");
    seed_video(&gw, me, true);
    let app = app!(gw, store, true);

    let req = test::TestRequest::get().uri("/api/v1/account/export").insert_header(bearer(me)).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let disposition = resp.headers().get("content-disposition").unwrap().to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"videome-data-"));
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["statistics"]["videos"], 1);
    assert!(body["exportDate"].is_string());
}
