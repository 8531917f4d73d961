#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use storefront_auth::{MemoryStorage, Navigator};
use storefront_client::{ApiClient, ApiRequest, ApiResponse, HttpError, HttpSend};
use storefront_core::{ClientConfig, RuntimeCapabilities};

/// Scripted backend: accepts bearer tokens from `valid`, mints `A2`, `A3`, ...
/// on refresh, and records every request it sees.
pub struct FakeBackend {
    pub valid: Mutex<HashSet<String>>,
    pub seen: Mutex<Vec<ApiRequest>>,
    pub refresh_calls: AtomicUsize,
    pub refresh_delay: Mutex<Duration>,
    pub refresh_fails: Mutex<bool>,
    /// Newly minted tokens are not added to `valid`.
    pub reject_minted: Mutex<bool>,
    pub issue_refresh_token: Mutex<bool>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            valid: Mutex::new(HashSet::new()),
            seen: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            refresh_delay: Mutex::new(Duration::from_millis(20)),
            refresh_fails: Mutex::new(false),
            reject_minted: Mutex::new(false),
            issue_refresh_token: Mutex::new(true),
        })
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_all(&self) {
        self.valid.lock().unwrap().clear();
    }

    /// Requests that reached a path, in arrival order.
    pub fn requests_to(&self, path: &str) -> Vec<ApiRequest> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.route() == path)
            .cloned()
            .collect()
    }

    fn login(&self) -> ApiResponse {
        self.valid.lock().unwrap().insert("A1".to_string());
        let refresh_token = self.issue_refresh_token.lock().unwrap().then_some("R1");
        ApiResponse::json_body(
            StatusCode::OK,
            &json!({
                "success": true,
                "data": {
                    "accessToken": "A1",
                    "refreshToken": refresh_token,
                    "user": { "id": 1, "username": "alice", "role": "user" }
                }
            }),
        )
    }

    async fn refresh(&self) -> ApiResponse {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        tokio::time::sleep(delay).await;

        if *self.refresh_fails.lock().unwrap() {
            return ApiResponse::json_body(
                StatusCode::UNAUTHORIZED,
                &json!({ "success": false, "message": "refresh token expired" }),
            );
        }

        let token = format!("A{}", n + 2);
        if !*self.reject_minted.lock().unwrap() {
            self.valid.lock().unwrap().insert(token.clone());
        }
        ApiResponse::json_body(
            StatusCode::OK,
            &json!({ "success": true, "data": { "accessToken": token } }),
        )
    }

    fn protected(&self, request: &ApiRequest) -> ApiResponse {
        let token = request.bearer_token().map(str::to_string);
        let authorized = token
            .as_ref()
            .is_some_and(|t| self.valid.lock().unwrap().contains(t));

        if request.route() == "/catalog" {
            return ApiResponse::json_body(StatusCode::OK, &json!({ "success": true, "data": ["tea"] }));
        }
        if !authorized {
            return ApiResponse::new(StatusCode::UNAUTHORIZED, "");
        }
        ApiResponse::json_body(
            StatusCode::OK,
            &json!({ "success": true, "data": { "path": request.route(), "token": token } }),
        )
    }
}

#[async_trait]
impl HttpSend for FakeBackend {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, HttpError> {
        self.seen.lock().unwrap().push(request.clone());
        let response = match request.route() {
            "/auth/login" if request.body.as_ref().is_some_and(|b| b["password"] == "pw") => self.login(),
            "/auth/login" => ApiResponse::new(StatusCode::UNAUTHORIZED, ""),
            "/auth/refresh" => self.refresh().await,
            "/slow" => {
                tokio::time::sleep(Duration::from_millis(80)).await;
                self.protected(&request)
            }
            _ => self.protected(&request),
        };
        Ok(response)
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    pub redirects: Mutex<Vec<Option<String>>>,
}

impl Navigator for RecordingNavigator {
    fn current_route(&self) -> Option<String> {
        Some("/wallet".to_string())
    }

    fn redirect_to_login(&self, return_to: Option<&str>) {
        self.redirects.lock().unwrap().push(return_to.map(str::to_string));
    }
}

pub struct Harness {
    pub backend: Arc<FakeBackend>,
    pub navigator: Arc<RecordingNavigator>,
    pub storage: Arc<MemoryStorage>,
    pub client: ApiClient,
}

pub fn harness() -> Harness {
    let backend = FakeBackend::new();
    let navigator = Arc::new(RecordingNavigator::default());
    let storage = Arc::new(MemoryStorage::new());
    let client = ApiClient::with_transport(
        &ClientConfig::default(),
        backend.clone(),
        storage.clone(),
        RuntimeCapabilities::ui(),
        navigator.clone(),
    );
    Harness {
        backend,
        navigator,
        storage,
        client,
    }
}
