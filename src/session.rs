use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::auth::{AuthClient, AuthError, AuthEvent, AuthResult, SignUpOutcome};
use crate::config::AppConfig;
use crate::models::{Identity, NewProfile};
use crate::repo::Repo;

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Authenticated(Identity),
    Anonymous,
    /// Terminal: required backend variables are missing.
    ConfigurationError(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct SignUpForm {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl SignUpForm {
    pub fn validate(&self) -> AuthResult<()> {
        if self.password != self.confirm_password {
            return Err(AuthError::Validation("Passwords do not match".into()));
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::Validation("Password must be at least 6 characters long".into()));
        }
        if self.username.trim().is_empty() {
            return Err(AuthError::Validation("Username is required".into()));
        }
        Ok(())
    }
}

/// Create the account, then its profile row. A failed profile insert is logged, not returned.
pub async fn register(auth: &dyn AuthClient, repo: &dyn Repo, form: &SignUpForm) -> AuthResult<SignUpOutcome> {
    form.validate()?;
    let username = form.username.trim().to_string();
    let metadata = serde_json::json!({
        "username": username,
        "full_name": form.full_name.clone().unwrap_or_default(),
    });
    let outcome = auth.sign_up(form.email.trim(), &form.password, metadata).await?;
    let profile = NewProfile {
        id: outcome.user.id,
        username,
        email: form.email.trim().to_string(),
        avatar_url: None,
    };
    if let Err(e) = repo.insert_profile(profile).await {
        error!(user = %outcome.user.id, error = %e, "profile creation failed after sign-up");
    }
    Ok(outcome)
}

/// Current identity of one client, kept in sync with the auth service's change stream.
pub struct SessionManager {
    auth: Arc<dyn AuthClient>,
    repo: Arc<dyn Repo>,
    state: Arc<watch::Sender<SessionState>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

fn apply(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|cur| {
        if matches!(cur, SessionState::ConfigurationError(_)) || *cur == next {
            return false;
        }
        *cur = next;
        true
    });
}

impl SessionManager {
    pub async fn start(config: &AppConfig, auth: Arc<dyn AuthClient>, repo: Arc<dyn Repo>) -> Arc<Self> {
        if !config.is_configured() {
            let missing = config.missing.iter().map(|s| s.to_string()).collect();
            let (tx, _) = watch::channel(SessionState::ConfigurationError(missing));
            error!("session unavailable: backend not configured");
            return Arc::new(Self { auth, repo, state: Arc::new(tx), listener: Mutex::new(None) });
        }

        let (tx, _) = watch::channel(SessionState::Initializing);
        let state = Arc::new(tx);
        let mut subscription = auth.events().subscribe();
        let task_state = state.clone();
        let listener = tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                let next = match event {
                    AuthEvent::SignedIn(id) | AuthEvent::UserUpdated(id) | AuthEvent::TokenRefreshed(id) => {
                        SessionState::Authenticated(id)
                    }
                    AuthEvent::SignedOut => SessionState::Anonymous,
                };
                apply(&task_state, next);
            }
        });

        let manager = Arc::new(Self { auth, repo, state, listener: Mutex::new(Some(listener)) });
        manager.resolve_initial().await;
        manager
    }

    async fn resolve_initial(&self) {
        let next = match self.auth.current_session() {
            None => SessionState::Anonymous,
            Some(session) => match self.auth.get_user(&session.access_token).await {
                Ok(identity) => SessionState::Authenticated(identity),
                Err(e) => {
                    warn!(error = %e, "stored session rejected");
                    SessionState::Anonymous
                }
            },
        };
        // an event may already have settled the state
        self.state.send_if_modified(|cur| {
            if *cur == SessionState::Initializing {
                *cur = next;
                true
            } else {
                false
            }
        });
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        match &*self.state.borrow() {
            SessionState::Authenticated(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn ensure_configured(&self) -> AuthResult<()> {
        match &*self.state.borrow() {
            SessionState::ConfigurationError(_) => Err(AuthError::NotConfigured),
            _ => Ok(()),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<Identity> {
        self.ensure_configured()?;
        let session = self.auth.sign_in_with_password(email, password).await?;
        apply(&self.state, SessionState::Authenticated(session.user.clone()));
        info!(user = %session.user.id, "signed in");
        Ok(session.user)
    }

    pub async fn sign_up(&self, form: &SignUpForm) -> AuthResult<SignUpOutcome> {
        self.ensure_configured()?;
        let outcome = register(self.auth.as_ref(), self.repo.as_ref(), form).await?;
        if let Some(session) = &outcome.session {
            apply(&self.state, SessionState::Authenticated(session.user.clone()));
        }
        Ok(outcome)
    }

    pub async fn sign_out(&self) -> AuthResult<()> {
        self.ensure_configured()?;
        let result = match self.auth.current_session() {
            Some(session) => self.auth.sign_out(&session.access_token).await,
            None => Ok(()),
        };
        apply(&self.state, SessionState::Anonymous);
        result
    }

    /// Stop listening for auth changes. Safe to call more than once.
    pub async fn shutdown(&self) {
        let handle = self.listener.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}
