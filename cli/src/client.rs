//! HTTP client for the Pomodoro server API.
//!
//! Each method maps to one route. Non-success responses are decoded from the
//! server's `{error, code}` body into [`ClientError::Api`]. Nothing is
//! retried; commands are interactive and the user can simply run them again.
//!
//! # Example
//!
//! ```no_run
//! use pomodoro_cli::client::{ApiClient, StartOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ApiClient::new("http://127.0.0.1:7070").unwrap();
//!     let session = client.start(&StartOptions::default()).await.unwrap();
//!     println!("{session}");
//! }
//! ```

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{ClientError, Result};
use crate::types::{Pomodoro, Task};

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Optional overrides for a start request. Unset fields use server defaults.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_break_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: String,
}

/// Client for one server.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Creates a client for `base_url` (e.g. `http://127.0.0.1:7070`).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn start(&self, options: &StartOptions) -> Result<Pomodoro> {
        let request = self.client.post(self.url("/pomodoro/start")).json(options);
        self.fetch(request).await
    }

    /// Latest session, or `None` when the server has none.
    pub async fn current(&self) -> Result<Option<Pomodoro>> {
        match self.fetch(self.client.get(self.url("/pomodoro/current"))).await {
            Ok(session) => Ok(Some(session)),
            Err(ClientError::Api { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn pause(&self, id: &str) -> Result<Pomodoro> {
        self.command(id, "pause").await
    }

    pub async fn resume(&self, id: &str) -> Result<Pomodoro> {
        self.command(id, "resume").await
    }

    pub async fn stop(&self, id: &str) -> Result<Pomodoro> {
        self.command(id, "stop").await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/pomodoro/{id}")));
        self.execute(request).await
    }

    pub async fn tasks(&self) -> Result<Vec<Task>> {
        self.fetch(self.client.get(self.url("/tasks"))).await
    }

    pub async fn create_task(&self, title: &str) -> Result<Task> {
        let request = self
            .client
            .post(self.url("/tasks"))
            .json(&json!({ "title": title }));
        self.fetch(request).await
    }

    pub async fn get_task(&self, id: &str) -> Result<Task> {
        self.fetch(self.client.get(self.url(&format!("/tasks/{id}"))))
            .await
    }

    pub async fn update_task(&self, id: &str, title: &str, completed: bool) -> Result<Task> {
        let request = self
            .client
            .put(self.url(&format!("/tasks/{id}")))
            .json(&json!({ "title": title, "completed": completed }));
        self.fetch(request).await
    }

    pub async fn delete_task(&self, id: &str) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/tasks/{id}")));
        self.execute(request).await
    }

    async fn command(&self, id: &str, action: &str) -> Result<Pomodoro> {
        let request = self
            .client
            .post(self.url(&format!("/pomodoro/{id}/{action}")));
        self.fetch(request).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "Response received");

        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(api_error(status, response).await)
    }

    async fn execute(&self, request: RequestBuilder) -> Result<()> {
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "Response received");

        if status.is_success() {
            return Ok(());
        }
        Err(api_error(status, response).await)
    }
}

async fn api_error(status: StatusCode, response: reqwest::Response) -> ClientError {
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => ClientError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.error,
        },
        Err(_) => ClientError::Api {
            status: status.as_u16(),
            code: String::new(),
            message: if text.trim().is_empty() {
                format!("server returned {status}")
            } else {
                text.trim().to_string()
            },
        },
    }
}
