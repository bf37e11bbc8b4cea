/// Command API: request/response calls against the kanban REST service.
///
/// [`CommandApi`] is the seam the reconciler depends on; [`HttpCommandApi`]
/// is the production implementation over reqwest.
use async_trait::async_trait;
use boardsync_core::types::{
    Board, BoardId, BoardSummary, Column, ColumnId, Comment, CommentId, NewColumn, NewTask,
    Task, TaskId, TaskPatch,
};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ApiError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Transport(e) => e.to_string(),
            ApiError::Status { message, .. } => message.clone(),
            ApiError::Decode(msg) => msg.clone(),
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status(),
            ApiError::Decode(_) => None,
        }
    }
}

#[async_trait]
pub trait CommandApi: Send + Sync {
    async fn list_boards(&self) -> Result<Vec<BoardSummary>, ApiError>;

    async fn get_board(&self, board_id: BoardId) -> Result<Board, ApiError>;

    async fn create_column(&self, board_id: BoardId, column: &NewColumn) -> Result<Column, ApiError>;

    /// Replace a column's name and position.
    async fn update_column(&self, column_id: ColumnId, column: &NewColumn) -> Result<Column, ApiError>;

    /// Delete a column together with its tasks.
    async fn delete_column(&self, column_id: ColumnId) -> Result<(), ApiError>;

    async fn create_task(&self, board_id: BoardId, task: &NewTask) -> Result<Task, ApiError>;

    async fn update_task(&self, task_id: TaskId, patch: &TaskPatch) -> Result<Task, ApiError>;

    async fn delete_task(&self, task_id: TaskId) -> Result<(), ApiError>;

    async fn move_task(
        &self,
        task_id: TaskId,
        column_id: ColumnId,
        position: usize,
    ) -> Result<(), ApiError>;

    async fn create_comment(&self, task_id: TaskId, content: &str) -> Result<Comment, ApiError>;

    /// Only the comment's author may edit it.
    async fn update_comment(&self, comment_id: CommentId, content: &str) -> Result<Comment, ApiError>;

    async fn delete_comment(&self, comment_id: CommentId) -> Result<(), ApiError>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

pub struct HttpCommandApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpCommandApi {
    pub fn new(base_url: &str, token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
    }

    async fn send(&self, builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(ApiError::Status {
            status,
            message: error_message(status, &text),
        })
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let resp = self.send(builder).await?;
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Prefer the service's `detail` field; fall back to the status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        match parsed.detail {
            serde_json::Value::String(s) if !s.is_empty() => return s,
            serde_json::Value::String(_) | serde_json::Value::Null => {}
            other => return other.to_string(),
        }
    }
    status
        .canonical_reason()
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
}

#[async_trait]
impl CommandApi for HttpCommandApi {
    async fn list_boards(&self) -> Result<Vec<BoardSummary>, ApiError> {
        self.send_json(self.request(Method::GET, "/boards")).await
    }

    async fn get_board(&self, board_id: BoardId) -> Result<Board, ApiError> {
        self.send_json(self.request(Method::GET, &format!("/boards/{}", board_id)))
            .await
    }

    async fn create_column(&self, board_id: BoardId, column: &NewColumn) -> Result<Column, ApiError> {
        let builder = self
            .request(Method::POST, &format!("/boards/{}/columns", board_id))
            .json(column);
        self.send_json(builder).await
    }

    async fn update_column(&self, column_id: ColumnId, column: &NewColumn) -> Result<Column, ApiError> {
        let builder = self
            .request(Method::PUT, &format!("/columns/{}", column_id))
            .json(column);
        self.send_json(builder).await
    }

    async fn delete_column(&self, column_id: ColumnId) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &format!("/columns/{}", column_id)))
            .await?;
        Ok(())
    }

    async fn create_task(&self, board_id: BoardId, task: &NewTask) -> Result<Task, ApiError> {
        let builder = self
            .request(Method::POST, &format!("/boards/{}/tasks", board_id))
            .json(task);
        self.send_json(builder).await
    }

    async fn update_task(&self, task_id: TaskId, patch: &TaskPatch) -> Result<Task, ApiError> {
        let builder = self
            .request(Method::PUT, &format!("/tasks/{}", task_id))
            .json(patch);
        self.send_json(builder).await
    }

    async fn delete_task(&self, task_id: TaskId) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &format!("/tasks/{}", task_id)))
            .await?;
        Ok(())
    }

    async fn move_task(
        &self,
        task_id: TaskId,
        column_id: ColumnId,
        position: usize,
    ) -> Result<(), ApiError> {
        let body = serde_json::json!({ "column_id": column_id, "position": position });
        self.send(
            self.request(Method::PUT, &format!("/tasks/{}/move", task_id))
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn create_comment(&self, task_id: TaskId, content: &str) -> Result<Comment, ApiError> {
        let body = serde_json::json!({ "content": content });
        let builder = self
            .request(Method::POST, &format!("/tasks/{}/comments", task_id))
            .json(&body);
        self.send_json(builder).await
    }

    async fn update_comment(&self, comment_id: CommentId, content: &str) -> Result<Comment, ApiError> {
        let body = serde_json::json!({ "content": content });
        let builder = self
            .request(Method::PUT, &format!("/comments/{}", comment_id))
            .json(&body);
        self.send_json(builder).await
    }

    async fn delete_comment(&self, comment_id: CommentId) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &format!("/comments/{}", comment_id)))
            .await?;
        Ok(())
    }
}
