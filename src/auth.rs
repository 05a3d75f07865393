use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use async_trait::async_trait;
use futures_util::future::LocalBoxFuture;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::Identity;
use crate::routes::AppState;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: Identity,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(Identity),
    SignedOut,
    UserUpdated(Identity),
    TokenRefreshed(Identity),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AuthError {
    #[error("backend not configured")]
    NotConfigured,
    #[error("Invalid login credentials")]
    InvalidCredentials,
    #[error("Email not confirmed")]
    EmailNotConfirmed,
    #[error("{0}")]
    Validation(String),
    #[error("auth service error: {0}")]
    Remote(String),
    #[error("transport: {0}")]
    Transport(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Auth-state change fan-out. Each subscription is counted until disposed.
#[derive(Clone)]
pub struct AuthEvents {
    tx: broadcast::Sender<AuthEvent>,
    listeners: Arc<AtomicUsize>,
}

impl Default for AuthEvents {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx, listeners: Arc::new(AtomicUsize::new(0)) }
    }
}

impl AuthEvents {
    pub fn emit(&self, event: AuthEvent) {
        // no receivers is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> AuthSubscription {
        self.listeners.fetch_add(1, Ordering::SeqCst);
        AuthSubscription { rx: self.tx.subscribe(), listeners: self.listeners.clone() }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.load(Ordering::SeqCst)
    }
}

/// Live subscription; dropping or calling [`AuthSubscription::unsubscribe`] disposes it.
pub struct AuthSubscription {
    rx: broadcast::Receiver<AuthEvent>,
    listeners: Arc<AtomicUsize>,
}

impl AuthSubscription {
    /// Next event, or `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<AuthEvent> {
        loop {
            match self.rx.recv().await {
                Ok(ev) => return Some(ev),
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "auth listener lagged"),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        self.listeners.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct SignUpOutcome {
    pub user: Identity,
    /// `None` when the account still has to confirm its email.
    pub session: Option<AuthSession>,
}

#[async_trait]
pub trait AuthClient: Send + Sync {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession>;
    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> AuthResult<SignUpOutcome>;
    async fn sign_out(&self, access_token: &str) -> AuthResult<()>;
    async fn get_user(&self, access_token: &str) -> AuthResult<Identity>;
    async fn update_password(&self, access_token: &str, new_password: &str) -> AuthResult<()>;
    fn current_session(&self) -> Option<AuthSession>;
    fn events(&self) -> &AuthEvents;
    fn is_configured(&self) -> bool {
        true
    }
}

// ---------------- REST implementation (auth service) ----------------
pub struct RestAuthClient {
    http: reqwest::Client,
    base: String,
    anon_key: String,
    session: Mutex<Option<AuthSession>>,
    events: AuthEvents,
}

#[derive(Deserialize, Default)]
struct AuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    msg: Option<String>,
}

impl AuthErrorBody {
    fn into_error(self, status: u16) -> AuthError {
        let message = self
            .error_description
            .or(self.msg)
            .or(self.error.clone())
            .unwrap_or_else(|| format!("status {status}"));
        let code = self.error_code.or(self.error).unwrap_or_default();
        if code == "email_not_confirmed" || message.contains("Email not confirmed") {
            AuthError::EmailNotConfirmed
        } else if code == "invalid_grant" || code == "invalid_credentials" {
            AuthError::InvalidCredentials
        } else if status == 400 || status == 422 {
            AuthError::Validation(message)
        } else {
            AuthError::Remote(message)
        }
    }
}

impl RestAuthClient {
    pub fn new(base: &str, anon_key: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            session: Mutex::new(None),
            events: AuthEvents::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base, path)
    }

    fn request(&self, method: reqwest::Method, path: &str, bearer: Option<&str>) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
    }

    async fn send(req: reqwest::RequestBuilder) -> AuthResult<Value> {
        let resp = req.send().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body: AuthErrorBody = resp.json().await.unwrap_or_default();
            return Err(body.into_error(status.as_u16()));
        }
        let text = resp.text().await.map_err(|e| AuthError::Transport(e.to_string()))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| AuthError::Remote(e.to_string()))
    }

    fn store_session(&self, session: Option<AuthSession>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }
}

fn parse<T: serde::de::DeserializeOwned>(v: Value) -> AuthResult<T> {
    serde_json::from_value(v).map_err(|e| AuthError::Remote(format!("unexpected auth payload: {e}")))
}

#[async_trait]
impl AuthClient for RestAuthClient {
    async fn sign_in_with_password(&self, email: &str, password: &str) -> AuthResult<AuthSession> {
        let req = self
            .request(reqwest::Method::POST, "token?grant_type=password", None)
            .json(&serde_json::json!({ "email": email, "password": password }));
        let session: AuthSession = parse(Self::send(req).await?)?;
        self.store_session(Some(session.clone()));
        self.events.emit(AuthEvent::SignedIn(session.user.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: Value) -> AuthResult<SignUpOutcome> {
        let req = self
            .request(reqwest::Method::POST, "signup", None)
            .json(&serde_json::json!({ "email": email, "password": password, "data": metadata }));
        let body = Self::send(req).await?;
        if body.get("access_token").is_some() {
            let session: AuthSession = parse(body)?;
            self.store_session(Some(session.clone()));
            self.events.emit(AuthEvent::SignedIn(session.user.clone()));
            Ok(SignUpOutcome { user: session.user.clone(), session: Some(session) })
        } else {
            let user: Identity = parse(body.get("user").cloned().unwrap_or(body))?;
            Ok(SignUpOutcome { user, session: None })
        }
    }

    async fn sign_out(&self, access_token: &str) -> AuthResult<()> {
        let req = self.request(reqwest::Method::POST, "logout", Some(access_token));
        let result = Self::send(req).await.map(|_| ());
        // local state is cleared even when the remote call fails
        self.store_session(None);
        self.events.emit(AuthEvent::SignedOut);
        result
    }

    async fn get_user(&self, access_token: &str) -> AuthResult<Identity> {
        let req = self.request(reqwest::Method::GET, "user", Some(access_token));
        match Self::send(req).await {
            Ok(v) => parse(v),
            Err(AuthError::Remote(_)) | Err(AuthError::Validation(_)) => Err(AuthError::InvalidCredentials),
            Err(e) => Err(e),
        }
    }

    async fn update_password(&self, access_token: &str, new_password: &str) -> AuthResult<()> {
        let req = self
            .request(reqwest::Method::PUT, "user", Some(access_token))
            .json(&serde_json::json!({ "password": new_password }));
        let user: Identity = parse(Self::send(req).await?)?;
        self.events.emit(AuthEvent::UserUpdated(user));
        Ok(())
    }

    fn current_session(&self) -> Option<AuthSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn events(&self) -> &AuthEvents {
        &self.events
    }
}

/// Every operation fails with `NotConfigured`.
#[derive(Default)]
pub struct UnconfiguredAuth {
    events: AuthEvents,
}

#[async_trait]
impl AuthClient for UnconfiguredAuth {
    async fn sign_in_with_password(&self, _email: &str, _password: &str) -> AuthResult<AuthSession> {
        Err(AuthError::NotConfigured)
    }
    async fn sign_up(&self, _email: &str, _password: &str, _metadata: Value) -> AuthResult<SignUpOutcome> {
        Err(AuthError::NotConfigured)
    }
    async fn sign_out(&self, _access_token: &str) -> AuthResult<()> {
        Err(AuthError::NotConfigured)
    }
    async fn get_user(&self, _access_token: &str) -> AuthResult<Identity> {
        Err(AuthError::NotConfigured)
    }
    async fn update_password(&self, _access_token: &str, _new_password: &str) -> AuthResult<()> {
        Err(AuthError::NotConfigured)
    }
    fn current_session(&self) -> Option<AuthSession> {
        None
    }
    fn events(&self) -> &AuthEvents {
        &self.events
    }
    fn is_configured(&self) -> bool {
        false
    }
}

pub fn build_auth_client(config: &crate::config::AppConfig) -> Arc<dyn AuthClient> {
    match &config.backend {
        Some(creds) => Arc::new(RestAuthClient::new(&creds.url, &creds.anon_key)),
        None => Arc::new(UnconfiguredAuth::default()),
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

/// Verify an access token issued by the auth service (HS256, audience `authenticated`).
pub fn decode_access_token(token: &str, secret: &str) -> Result<Identity, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_audience(&["authenticated"]);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(Identity {
        id: data.claims.sub,
        email: data.claims.email,
        email_confirmed_at: None,
        created_at: None,
    })
}

/// Extractor yielding the caller's identity and bearer token.
#[derive(Debug, Clone)]
pub struct Auth {
    pub identity: Identity,
    pub access_token: String,
}

impl FromRequest for Auth {
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let bearer = BearerAuth::from_request(req, pl).into_inner();
        let state = req.app_data::<web::Data<AppState>>().cloned();
        Box::pin(async move {
            let Ok(bearer) = bearer else {
                return Err(actix_web::error::ErrorUnauthorized("Authorization required"));
            };
            let Some(state) = state else {
                return Err(actix_web::error::ErrorInternalServerError("missing app state"));
            };
            let token = bearer.token().to_string();
            let identity = match state.config.jwt_secret.as_deref() {
                Some(secret) => decode_access_token(&token, secret).map_err(|e| {
                    debug!("rejected access token: {e}");
                    actix_web::error::ErrorUnauthorized("Invalid token")
                })?,
                None => state.auth.get_user(&token).await.map_err(|e| {
                    debug!("auth service rejected token: {e}");
                    actix_web::error::ErrorUnauthorized("Invalid token")
                })?,
            };
            Ok(Auth { identity, access_token: token })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[derive(Serialize)]
    struct TestClaims {
        sub: Uuid,
        email: &'static str,
        aud: &'static str,
        exp: usize,
    }

    fn token(secret: &str, aud: &'static str) -> (Uuid, String) {
        let sub = Uuid::new_v4();
        let exp = (chrono::Utc::now().timestamp() + 3600) as usize;
        let t = encode(
            &Header::default(),
            &TestClaims { sub, email: "a@b.c", aud, exp },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();
        (sub, t)
    }

    #[test]
    fn access_token_yields_identity() {
        let (sub, t) = token("s3cret", "authenticated");
        let id = decode_access_token(&t, "s3cret").unwrap();
        assert_eq!(id.id, sub);
        assert_eq!(id.email.as_deref(), Some("a@b.c"));
    }

    #[test]
    fn wrong_audience_or_secret_rejected() {
        let (_, t) = token("s3cret", "anon");
        assert!(decode_access_token(&t, "s3cret").is_err());
        let (_, t) = token("s3cret", "authenticated");
        assert!(decode_access_token(&t, "other").is_err());
    }

    #[test]
    fn error_body_classification() {
        let body = AuthErrorBody { error: Some("invalid_grant".into()), ..Default::default() };
        assert_eq!(body.into_error(400), AuthError::InvalidCredentials);
        let body = AuthErrorBody { msg: Some("Email not confirmed".into()), ..Default::default() };
        assert_eq!(body.into_error(400), AuthError::EmailNotConfirmed);
        let body = AuthErrorBody { msg: Some("Password should be at least 6 characters".into()), ..Default::default() };
        assert!(matches!(body.into_error(422), AuthError::Validation(_)));
    }

    #[test]
    fn subscription_count_tracks_disposal() {
        let events = AuthEvents::default();
        let sub = events.subscribe();
        assert_eq!(events.listener_count(), 1);
        sub.unsubscribe();
        assert_eq!(events.listener_count(), 0);
    }
}
