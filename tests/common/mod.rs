//! Shared harness for the HTTP tests: a throwaway database, a state with
//! recording provider doubles, and helpers to drive the router in-process.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use kyozo::auth::{session, Realm};
use kyozo::community::{self, members, NewCommunity, Role};
use kyozo::config::Config;
use kyozo::db::{self, models::Community};
use kyozo::providers::{EmailProvider, OutboundEmail, ProviderError, SentMessage};
use kyozo::state::{AppState, DbPool};
use kyozo::users::{self, NewUser};

/// Captures every message instead of sending it.
#[derive(Default)]
pub struct RecordingEmail {
    pub sent: Mutex<Vec<OutboundEmail>>,
}

impl RecordingEmail {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn last_text(&self) -> Option<String> {
        self.sent.lock().unwrap().last().and_then(|e| e.text.clone())
    }
}

#[async_trait]
impl EmailProvider for RecordingEmail {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, email: &OutboundEmail) -> Result<SentMessage, ProviderError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push(email.clone());
        Ok(SentMessage {
            id: format!("rec-{}", sent.len()),
            provider: "recording".into(),
        })
    }
}

pub struct TestApp {
    pub _dir: TempDir,
    pub state: AppState,
    pub router: Router,
    pub email: Arc<RecordingEmail>,
}

pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.database.path = Some(dir.path().join("test.db"));
    config.storage.path = Some(dir.path().join("uploads"));
    config.storage.mock_latency_ms = 0;
    config.auth.bcrypt_cost = 4;
    config.providers.max_retries = 0;
    config
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        tweak(&mut config);

        let pool = db::create_pool(&config.db_path()).unwrap();
        db::run_migrations(&pool).unwrap();

        let email = Arc::new(RecordingEmail::default());
        let mut state = AppState::new(pool, config).unwrap();
        state.email = email.clone();
        let router = kyozo::app(state.clone());

        Self {
            _dir: dir,
            state,
            router,
            email,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.state.db
    }

    pub fn seed_user(&self, email: &str) -> String {
        users::create_user(
            self.db(),
            NewUser {
                email: email.into(),
                display_name: email.split('@').next().map(str::to_string),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    pub fn token_for(&self, user_id: &str, realm: Realm) -> String {
        session::create_session(self.db(), user_id, realm, 1).unwrap()
    }

    pub fn seed_community(&self, owner_id: &str, handle: &str) -> Community {
        community::create_community(
            self.db(),
            owner_id,
            NewCommunity {
                handle: handle.into(),
                name: format!("{} community", handle),
                tagline: None,
                community_profile_image: None,
                community_background_image: None,
                tags: vec![],
                visibility: None,
            },
        )
        .unwrap()
    }

    pub fn add_member(&self, user_id: &str, community_id: &str) {
        members::join_community(self.db(), user_id, community_id, Role::Member).unwrap();
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(Value::Null)
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(request(Method::GET, uri, token, None)).await
    }

    pub async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send(request(Method::POST, uri, token, Some(body))).await
    }
}

pub fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Pull the one-time token out of an emailed link.
pub fn token_from_link(text: &str) -> String {
    let start = text.find("token=").expect("link with token") + "token=".len();
    text[start..]
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect()
}
