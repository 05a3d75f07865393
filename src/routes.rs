use std::sync::Arc;

use actix_multipart::Multipart;
use actix_web::http::header;
use actix_web::{web, HttpResponse, ResponseError};
use futures_util::TryStreamExt as _;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

use crate::account::{AccountService, AvatarFile, DataExport, ProfileForm, MAX_AVATAR_BYTES};
use crate::auth::{Auth, AuthClient, AuthSession, SignUpOutcome};
use crate::comments::{CommentThread, PostOutcome};
use crate::config::{AppConfig, SetupGuide};
use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::models::*;
use crate::notify::{Notification, Notifier, ToastQueue};
use crate::pages::{
    HelpPage, HomePage, MyVideosPage, OwnProfilePage, Page, PagedVideos, Pages, ProfilePage, SearchFilter, SearchPage,
    SearchParams, SearchSort, SettingsPage, SubscriptionsPage, TrendingPage, UploadPage, WatchLaterPage, WatchPage,
};
use crate::relations::RepoRelation;
use crate::repo::{GatewayRepo, Repo};
use crate::session::{register, SignUpForm};
use crate::storage::MediaStore;
use crate::toggle::{RelationKind, RelationRegistry, Rejection, ToggleOutcome};
use crate::upload::{FrameGrabber, SelectedFile, UploadPipeline, UploadReport, VideoMetadata, MAX_VIDEO_BYTES};

pub const SIGN_IN_PATH: &str = "/auth/signin";

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/signin").route(web::post().to(sign_in)))
            .service(web::resource("/auth/signup").route(web::post().to(sign_up)))
            .service(web::resource("/auth/signout").route(web::post().to(sign_out)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(
                web::scope("/pages")
                    .route("/home", web::get().to(home_page))
                    .route("/search", web::get().to(search_page))
                    .route("/watch/{id}", web::get().to(watch_page))
                    .route("/upload", web::get().to(upload_page))
                    .route("/my-videos", web::get().to(my_videos_page))
                    .route("/liked", web::get().to(liked_page))
                    .route("/watch-later", web::get().to(watch_later_page))
                    .route("/subscriptions", web::get().to(subscriptions_page))
                    .route("/trending", web::get().to(trending_page))
                    .route("/profile", web::get().to(own_profile_page))
                    .route("/profile/{username}", web::get().to(profile_page))
                    .route("/settings", web::get().to(settings_page))
                    .route("/help", web::get().to(help_page)),
            )
            .service(web::resource("/videos").route(web::post().to(upload_video)))
            .service(web::resource("/videos/{id}").route(web::delete().to(delete_video)))
            .service(
                web::resource("/videos/{id}/like")
                    .route(web::put().to(like_video))
                    .route(web::delete().to(unlike_video)),
            )
            .service(web::resource("/videos/{id}/like/toggle").route(web::post().to(toggle_like_rpc)))
            .service(
                web::resource("/videos/{id}/dislike")
                    .route(web::put().to(dislike_video))
                    .route(web::delete().to(undislike_video)),
            )
            .service(
                web::resource("/videos/{id}/watch-later")
                    .route(web::put().to(save_for_later))
                    .route(web::delete().to(remove_from_later)),
            )
            .service(
                web::resource("/videos/{id}/comments")
                    .route(web::get().to(list_comments))
                    .route(web::post().to(post_comment)),
            )
            .service(
                web::resource("/channels/{id}/subscription")
                    .route(web::put().to(subscribe_channel))
                    .route(web::delete().to(unsubscribe_channel)),
            )
            .service(web::resource("/profile").route(web::patch().to(update_profile)))
            .service(web::resource("/profile/avatar").route(web::post().to(upload_avatar)))
            .service(web::resource("/account/password").route(web::post().to(change_password)))
            .service(web::resource("/account/export").route(web::get().to(export_account)))
            .service(web::resource("/account").route(web::delete().to(delete_account))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub gateway: Arc<dyn Gateway>,
    pub store: Arc<dyn MediaStore>,
    pub auth: Arc<dyn AuthClient>,
    pub frames: Arc<dyn FrameGrabber>,
}

impl AppState {
    /// Repository acting as the caller when a token is present, anonymous otherwise.
    pub fn repo_for(&self, auth: Option<&Auth>) -> Arc<dyn Repo> {
        match auth {
            Some(a) => Arc::new(GatewayRepo::new(self.gateway.authorized(&a.access_token))),
            None => Arc::new(GatewayRepo::new(self.gateway.clone())),
        }
    }

    pub fn store_for(&self, auth: &Auth) -> Arc<dyn MediaStore> {
        self.store.authorized(&auth.access_token)
    }

    pub fn pages(&self, auth: Option<&Auth>) -> Pages {
        let store = match auth {
            Some(a) => self.store_for(a),
            None => self.store.clone(),
        };
        Pages::new(self.repo_for(auth), store, self.config.setup_guide())
    }

    fn account(&self, auth: &Auth) -> AccountService {
        AccountService::new(self.repo_for(Some(auth)), self.store_for(auth), self.auth.clone())
    }
}

fn render<T: Serialize>(page: Page<T>) -> HttpResponse {
    match page {
        Page::Ready(body) => HttpResponse::Ok().json(body),
        Page::RedirectToSignIn => HttpResponse::SeeOther().insert_header((header::LOCATION, SIGN_IN_PATH)).finish(),
        Page::NotFound => ApiError::NotFound.error_response(),
        Page::SetupRequired(guide) => HttpResponse::ServiceUnavailable().json(guide),
    }
}

fn identity(auth: &Option<Auth>) -> Option<&Identity> {
    auth.as_ref().map(|a| &a.identity)
}

// ---------------- auth ----------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signin",
    request_body = SignInRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthSession),
        (status = 401, description = "Invalid credentials or unconfirmed email"),
        (status = 503, description = "Backend not configured")
    )
)]
pub async fn sign_in(data: web::Data<AppState>, payload: web::Json<SignInRequest>) -> Result<HttpResponse, ApiError> {
    let session = data.auth.sign_in_with_password(payload.email.trim(), &payload.password).await?;
    info!(user = %session.user.id, "signed in");
    Ok(HttpResponse::Ok().json(session))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    request_body = SignUpForm,
    responses(
        (status = 201, description = "Account created", body = SignUpOutcome),
        (status = 400, description = "Validation failed")
    )
)]
pub async fn sign_up(data: web::Data<AppState>, payload: web::Json<SignUpForm>) -> Result<HttpResponse, ApiError> {
    if !data.config.is_configured() {
        return Err(ApiError::NotConfigured);
    }
    let repo = data.repo_for(None);
    let outcome = register(data.auth.as_ref(), repo.as_ref(), &payload).await?;
    Ok(HttpResponse::Created().json(outcome))
}

#[utoipa::path(post, path = "/api/v1/auth/signout", responses((status = 204, description = "Signed out")))]
pub async fn sign_out(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.auth.sign_out(&auth.access_token).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current identity", body = Identity),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn auth_me(auth: Auth) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(auth.identity))
}

// ---------------- pages ----------------

#[derive(Debug, Deserialize, IntoParams)]
pub struct OffsetQuery {
    #[serde(default)]
    pub offset: usize,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct TrendingQuery {
    #[serde(default)]
    pub period: TimePeriod,
    #[serde(default)]
    pub sort: TrendingSort,
    #[serde(default)]
    pub offset: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/home",
    responses(
        (status = 200, description = "Public videos, newest first", body = HomePage),
        (status = 303, description = "Sign in required"),
        (status = 503, description = "Setup required", body = SetupGuide)
    )
)]
pub async fn home_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).home(identity(&auth)).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/search",
    params(
        ("q" = Option<String>, Query, description = "Search term"),
        ("filter" = Option<SearchFilter>, Query, description = "all | videos | channels"),
        ("sort" = Option<SearchSort>, Query, description = "relevance | date | views | rating")
    ),
    responses((status = 200, description = "Search results", body = SearchPage))
)]
pub async fn search_page(auth: Option<Auth>, data: web::Data<AppState>, query: web::Query<SearchParams>) -> HttpResponse {
    render(data.pages(auth.as_ref()).search(&query).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/watch/{id}",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Video with related videos, comments and viewer state", body = WatchPage),
        (status = 303, description = "Sign in required"),
        (status = 404, description = "Missing, or private and not owned by the viewer")
    )
)]
pub async fn watch_page(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> HttpResponse {
    render(data.pages(auth.as_ref()).watch(identity(&auth), path.into_inner()).await)
}

#[utoipa::path(get, path = "/api/v1/pages/upload", responses((status = 200, description = "Upload limits", body = UploadPage)))]
pub async fn upload_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).upload(identity(&auth)).await)
}

#[utoipa::path(get, path = "/api/v1/pages/my-videos", responses((status = 200, description = "Own videos", body = MyVideosPage)))]
pub async fn my_videos_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).my_videos(identity(&auth)).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/liked",
    params(OffsetQuery),
    responses((status = 200, description = "One page of liked videos", body = PagedVideos))
)]
pub async fn liked_page(auth: Option<Auth>, data: web::Data<AppState>, query: web::Query<OffsetQuery>) -> HttpResponse {
    render(data.pages(auth.as_ref()).liked(identity(&auth), query.offset).await)
}

#[utoipa::path(get, path = "/api/v1/pages/watch-later", responses((status = 200, description = "Saved videos", body = WatchLaterPage)))]
pub async fn watch_later_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).watch_later(identity(&auth)).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/subscriptions",
    responses((status = 200, description = "Subscribed channels and their recent videos", body = SubscriptionsPage))
)]
pub async fn subscriptions_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).subscriptions(identity(&auth)).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/trending",
    params(TrendingQuery),
    responses((status = 200, description = "One page of trending videos", body = TrendingPage))
)]
pub async fn trending_page(auth: Option<Auth>, data: web::Data<AppState>, query: web::Query<TrendingQuery>) -> HttpResponse {
    render(data.pages(auth.as_ref()).trending(query.period, query.sort, query.offset).await)
}

#[utoipa::path(
    get,
    path = "/api/v1/pages/profile/{username}",
    params(("username" = String, Path, description = "Channel username")),
    responses(
        (status = 200, description = "Public channel page", body = ProfilePage),
        (status = 404, description = "No such channel")
    )
)]
pub async fn profile_page(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    render(data.pages(auth.as_ref()).public_profile(identity(&auth), &path).await)
}

#[utoipa::path(get, path = "/api/v1/pages/profile", responses((status = 200, description = "Own profile and stats", body = OwnProfilePage)))]
pub async fn own_profile_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).own_profile(identity(&auth)).await)
}

#[utoipa::path(get, path = "/api/v1/pages/settings", responses((status = 200, description = "Account settings", body = SettingsPage)))]
pub async fn settings_page(auth: Option<Auth>, data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(auth.as_ref()).settings(identity(&auth)).await)
}

#[utoipa::path(get, path = "/api/v1/pages/help", responses((status = 200, description = "FAQ", body = HelpPage)))]
pub async fn help_page(data: web::Data<AppState>) -> HttpResponse {
    render(data.pages(None).help())
}

// ---------------- relations ----------------

#[derive(Debug, Serialize, ToSchema)]
pub struct RelationResponse {
    pub kind: RelationKind,
    pub value: Option<bool>,
    pub notifications: Vec<Notification>,
}

/// Drive one optimistic toggle towards `on` and report where it settled.
async fn set_relation(data: &AppState, auth: &Auth, kind: RelationKind, target: Id, on: bool) -> Result<HttpResponse, ApiError> {
    let repo = data.repo_for(Some(auth));
    let toasts = ToastQueue::new();
    let notifier: Arc<dyn Notifier> = Arc::new(toasts.clone());
    let registry = RelationRegistry::new(Some(auth.identity.id), notifier);
    let control = match kind {
        RelationKind::Like | RelationKind::Dislike => {
            let (like, dislike) = registry.reactions(
                RepoRelation::shared(RelationKind::Like, repo.clone()),
                RepoRelation::shared(RelationKind::Dislike, repo),
                target,
            );
            if kind == RelationKind::Like { like } else { dislike }
        }
        _ => registry.control(RepoRelation::shared(kind, repo), target),
    };

    let self_target = kind.forbids_self_target() && target == auth.identity.id;
    if !self_target {
        control.load().await?;
    }
    if control.displayed() != Some(on) {
        let outcome = control.toggle().await;
        let body = RelationResponse { kind, value: control.displayed(), notifications: toasts.drain() };
        return Ok(match outcome {
            ToggleOutcome::Rejected(Rejection::SelfTarget) => HttpResponse::BadRequest().json(body),
            ToggleOutcome::Rejected(Rejection::SignInRequired) => HttpResponse::Unauthorized().json(body),
            ToggleOutcome::RolledBack => HttpResponse::BadGateway().json(body),
            ToggleOutcome::Ignored => HttpResponse::Conflict().json(body),
            ToggleOutcome::Confirmed(_) => HttpResponse::Ok().json(body),
        });
    }
    Ok(HttpResponse::Ok().json(RelationResponse { kind, value: control.displayed(), notifications: toasts.drain() }))
}

#[utoipa::path(
    put,
    path = "/api/v1/videos/{id}/like",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Liked", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn like_video(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Like, path.into_inner(), true).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}/like",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Like removed", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn unlike_video(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Like, path.into_inner(), false).await
}

#[utoipa::path(
    put,
    path = "/api/v1/videos/{id}/dislike",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Disliked", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn dislike_video(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Dislike, path.into_inner(), true).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}/dislike",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Dislike removed", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn undislike_video(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Dislike, path.into_inner(), false).await
}

#[utoipa::path(
    put,
    path = "/api/v1/videos/{id}/watch-later",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Saved for later", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn save_for_later(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::WatchLater, path.into_inner(), true).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}/watch-later",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 200, description = "Removed from watch later", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn remove_from_later(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::WatchLater, path.into_inner(), false).await
}

#[utoipa::path(
    put,
    path = "/api/v1/channels/{id}/subscription",
    params(("id" = Id, Path, description = "Channel (user) id")),
    responses(
        (status = 200, description = "Subscribed", body = RelationResponse),
        (status = 400, description = "Cannot subscribe to yourself", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn subscribe_channel(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Subscribe, path.into_inner(), true).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/channels/{id}/subscription",
    params(("id" = Id, Path, description = "Channel (user) id")),
    responses(
        (status = 200, description = "Unsubscribed", body = RelationResponse),
        (status = 502, description = "Rolled back", body = RelationResponse)
    )
)]
pub async fn unsubscribe_channel(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    set_relation(&data, &auth, RelationKind::Subscribe, path.into_inner(), false).await
}

#[utoipa::path(
    post,
    path = "/api/v1/videos/{id}/like/toggle",
    params(("id" = Id, Path, description = "Video id")),
    responses((status = 200, description = "Result of the toggle_video_like procedure"))
)]
pub async fn toggle_like_rpc(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let result = data.repo_for(Some(&auth)).toggle_like(auth.identity.id, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(result))
}

// ---------------- comments ----------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct CommentRequest {
    pub content: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/videos/{id}/comments",
    params(("id" = Id, Path, description = "Video id")),
    responses((status = 200, description = "Top-level comments, newest first", body = [Comment]))
)]
pub async fn list_comments(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let viewer = auth.as_ref().map(|a| a.identity.id);
    let mut thread = CommentThread::new(path.into_inner(), viewer, data.repo_for(auth.as_ref()), Arc::new(ToastQueue::new()));
    thread.load().await?;
    Ok(HttpResponse::Ok().json(thread.into_comments()))
}

#[utoipa::path(
    post,
    path = "/api/v1/videos/{id}/comments",
    params(("id" = Id, Path, description = "Video id")),
    request_body = CommentRequest,
    responses(
        (status = 201, description = "Comment posted", body = Comment),
        (status = 400, description = "Empty comment")
    )
)]
pub async fn post_comment(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<CommentRequest>,
) -> Result<HttpResponse, ApiError> {
    let mut thread = CommentThread::new(
        path.into_inner(),
        Some(auth.identity.id),
        data.repo_for(Some(&auth)),
        Arc::new(ToastQueue::new()),
    );
    match thread.post(&payload.content).await {
        PostOutcome::Posted(comment) => Ok(HttpResponse::Created().json(comment)),
        PostOutcome::Empty => Err(ApiError::BadRequest("Comment cannot be empty".into())),
        PostOutcome::SignInRequired => Err(ApiError::Unauthorized("Please sign in to comment".into())),
        PostOutcome::Failed(e) => Err(e.into()),
    }
}

// ---------------- uploads ----------------

/// A multipart part: text fields keep `bytes` as UTF-8.
struct Part {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    bytes: Vec<u8>,
}

/// Buffer every part, refusing any single part larger than `limit`.
async fn read_parts(mut payload: Multipart, limit: usize) -> Result<Vec<Part>, ApiError> {
    let mut parts = Vec::new();
    while let Some(mut field) = payload.try_next().await.map_err(|e| {
        error!("multipart error: {e}");
        ApiError::BadRequest("malformed multipart body".into())
    })? {
        let cd = field.content_disposition();
        let Some(name) = cd.get_name().map(str::to_string) else { continue };
        let filename = cd.get_filename().map(str::to_string);
        let content_type = field.content_type().map(|m| m.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(|e| {
            error!("stream read error: {e}");
            ApiError::BadRequest("malformed multipart body".into())
        })? {
            if bytes.len() + chunk.len() > limit {
                return Err(ApiError::TooLarge);
            }
            bytes.extend_from_slice(&chunk);
        }
        parts.push(Part { name, filename, content_type, bytes });
    }
    Ok(parts)
}

fn text(parts: &[Part], name: &str) -> Option<String> {
    parts.iter().find(|p| p.name == name && p.filename.is_none()).map(|p| String::from_utf8_lossy(&p.bytes).into_owned())
}

fn take_file(parts: &mut Vec<Part>, name: &str) -> Option<Part> {
    let idx = parts.iter().position(|p| p.name == name)?;
    Some(parts.swap_remove(idx))
}

/// Declared type from the part header, falling back to sniffing the bytes.
fn declared_type(part: &Part) -> String {
    part.content_type
        .clone()
        .filter(|t| t != "application/octet-stream")
        .or_else(|| infer::get(&part.bytes).map(|t| t.mime_type().to_string()))
        .unwrap_or_else(|| "application/octet-stream".into())
}

#[utoipa::path(
    post,
    path = "/api/v1/videos",
    responses(
        (status = 201, description = "Video stored and row inserted", body = UploadReport),
        (status = 400, description = "Not a video, or no title"),
        (status = 413, description = "Payload too large")
    )
)]
pub async fn upload_video(auth: Auth, data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    // a little headroom so the pipeline reports the size itself
    let mut parts = read_parts(payload, MAX_VIDEO_BYTES + 1).await?;
    let meta = VideoMetadata {
        title: text(&parts, "title").unwrap_or_default(),
        description: text(&parts, "description").unwrap_or_default(),
        tags: text(&parts, "tags")
            .map(|t| t.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default(),
        is_public: text(&parts, "is_public").map(|v| v != "false" && v != "0").unwrap_or(true),
    };
    let Some(part) = take_file(&mut parts, "file") else {
        return Err(ApiError::BadRequest("Please select a video file and provide a title".into()));
    };
    let file = SelectedFile {
        name: part.filename.clone().unwrap_or_else(|| "video.mp4".into()),
        declared_type: declared_type(&part),
        bytes: part.bytes,
    };
    let pipeline = UploadPipeline::new(data.repo_for(Some(&auth)), data.store_for(&auth), data.frames.clone());
    let report = pipeline.run(Some(auth.identity.id), file, meta).await?;
    Ok(HttpResponse::Created().json(report))
}

#[utoipa::path(
    delete,
    path = "/api/v1/videos/{id}",
    params(("id" = Id, Path, description = "Video id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Missing or not owned by the caller")
    )
)]
pub async fn delete_video(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    data.account(&auth).delete_video(auth.identity.id, path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ---------------- account ----------------

#[utoipa::path(
    patch,
    path = "/api/v1/profile",
    request_body = ProfileForm,
    responses((status = 204, description = "Profile updated"), (status = 400, description = "Validation failed"))
)]
pub async fn update_profile(auth: Auth, data: web::Data<AppState>, payload: web::Json<ProfileForm>) -> Result<HttpResponse, ApiError> {
    data.account(&auth).update_profile(auth.identity.id, payload.into_inner(), None).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/v1/profile/avatar",
    responses((status = 204, description = "Avatar replaced"), (status = 400, description = "Not an image or too large"))
)]
pub async fn upload_avatar(auth: Auth, data: web::Data<AppState>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let mut parts = read_parts(payload, MAX_AVATAR_BYTES + 1).await?;
    let Some(part) = take_file(&mut parts, "avatar") else {
        return Err(ApiError::BadRequest("Please select an image file".into()));
    };
    let avatar = AvatarFile {
        name: part.filename.clone().unwrap_or_else(|| "avatar.png".into()),
        declared_type: declared_type(&part),
        bytes: part.bytes,
    };
    let current = data.repo_for(Some(&auth)).get_profile(auth.identity.id).await?;
    let form = ProfileForm {
        username: current.username,
        full_name: current.full_name.unwrap_or_default(),
        bio: current.bio.unwrap_or_default(),
        website: current.website.unwrap_or_default(),
    };
    data.account(&auth).update_profile(auth.identity.id, form, Some(avatar)).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PasswordChange {
    pub new_password: String,
    pub confirm_password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/account/password",
    request_body = PasswordChange,
    responses((status = 204, description = "Password changed"), (status = 400, description = "Validation failed"))
)]
pub async fn change_password(auth: Auth, data: web::Data<AppState>, payload: web::Json<PasswordChange>) -> Result<HttpResponse, ApiError> {
    data.account(&auth)
        .change_password(&auth.access_token, &payload.new_password, &payload.confirm_password)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(get, path = "/api/v1/account/export", responses((status = 200, description = "Account data export", body = DataExport)))]
pub async fn export_account(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let export = data.account(&auth).export(&auth.identity).await?;
    let filename = format!("videome-data-{}.json", export.export_date.format("%Y-%m-%d"));
    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_DISPOSITION, format!("attachment; filename=\"{filename}\"")))
        .json(export))
}

#[utoipa::path(delete, path = "/api/v1/account", responses((status = 204, description = "Profile, videos and subscriptions deleted")))]
pub async fn delete_account(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    data.account(&auth).delete_account(auth.identity.id).await?;
    if let Err(e) = data.auth.sign_out(&auth.access_token).await {
        error!(user = %auth.identity.id, error = %e, "sign-out after account deletion failed");
    }
    Ok(HttpResponse::NoContent().finish())
}
