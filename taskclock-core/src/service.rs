//! Task service REST client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::task::{AuthStatus, NewTask, Task, TaskId, TaskUpdate};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("task service returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid service URL: {0}")]
    Url(#[from] url::ParseError),
}

/// Operations the timer core and front-ends need from the task service.
#[async_trait]
pub trait TaskService: Send + Sync {
    async fn list_tasks(&self) -> Result<Vec<Task>, ServiceError>;
    async fn create_task(&self, task: &NewTask) -> Result<Task, ServiceError>;
    async fn update_task(&self, id: TaskId, update: &TaskUpdate) -> Result<Task, ServiceError>;
    async fn delete_task(&self, id: TaskId) -> Result<(), ServiceError>;
    async fn start_timer(&self, id: TaskId) -> Result<Task, ServiceError>;
    async fn stop_timer(&self, id: TaskId) -> Result<Task, ServiceError>;
    async fn auth_status(&self) -> Result<AuthStatus, ServiceError>;
}

/// [`TaskService`] over HTTP. The session cookie issued by the service is
/// kept for the lifetime of the client.
#[derive(Debug, Clone)]
pub struct HttpTaskService {
    client: Client,
    api: Url,
}

impl HttpTaskService {
    /// `server` is the service root, e.g. `http://localhost:6969`; requests
    /// go to `{server}/api/...`.
    pub fn new(server: &Url, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        let mut api = server.clone();
        let prefix = server.path().trim_end_matches('/').to_string();
        api.set_path(&format!("{prefix}/api/"));
        Ok(Self { client, api })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ServiceError> {
        let url = self.api.join(path)?;
        debug!(%method, %url, "task service request");
        Ok(self.client.request(method, url))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ServiceError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let message = error_detail(&body);
        error!(status = status.as_u16(), "task service error: {message}");
        Err(ServiceError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ServiceError> {
        Ok(self.send(request).await?.json().await?)
    }
}

/// Pulls `detail` out of a JSON error body, falling back to the raw body.
fn error_detail(body: &str) -> String {
    #[derive(Deserialize)]
    struct Detail {
        detail: serde_json::Value,
    }

    match serde_json::from_str::<Detail>(body) {
        Ok(Detail {
            detail: serde_json::Value::String(s),
        }) => s,
        Ok(Detail { detail }) => detail.to_string(),
        Err(_) if body.trim().is_empty() => "no details".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl TaskService for HttpTaskService {
    async fn list_tasks(&self) -> Result<Vec<Task>, ServiceError> {
        self.json(self.request(Method::GET, "tasks/")?).await
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task, ServiceError> {
        self.json(self.request(Method::POST, "tasks")?.json(task))
            .await
    }

    async fn update_task(&self, id: TaskId, update: &TaskUpdate) -> Result<Task, ServiceError> {
        self.json(self.request(Method::PUT, &format!("tasks/{id}/"))?.json(update))
            .await
    }

    async fn delete_task(&self, id: TaskId) -> Result<(), ServiceError> {
        let request = self
            .request(Method::DELETE, "tasks/")?
            .query(&[("task_id", id)]);
        self.send(request).await?;
        Ok(())
    }

    async fn start_timer(&self, id: TaskId) -> Result<Task, ServiceError> {
        self.json(self.request(Method::PUT, &format!("tasks/{id}/timer_start/"))?)
            .await
    }

    async fn stop_timer(&self, id: TaskId) -> Result<Task, ServiceError> {
        self.json(self.request(Method::PUT, &format!("tasks/{id}/timer_stop/"))?)
            .await
    }

    async fn auth_status(&self) -> Result<AuthStatus, ServiceError> {
        self.json(self.request(Method::GET, "auth/status")?).await
    }
}
