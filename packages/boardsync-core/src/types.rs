use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub type BoardId = i64;
pub type ColumnId = i64;
pub type TaskId = i64;
pub type UserId = i64;
pub type CommentId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

/// Workflow stage a column represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnStatus {
    Backlog,
    Todo,
    InProgress,
    Done,
}

impl ColumnStatus {
    /// Best-effort mapping from a column name. Unrecognized names carry no status.
    pub fn infer_from_name(name: &str) -> Option<Self> {
        let key = name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        match key.as_str() {
            "backlog" => Some(ColumnStatus::Backlog),
            "to do" | "todo" => Some(ColumnStatus::Todo),
            "in progress" => Some(ColumnStatus::InProgress),
            "done" => Some(ColumnStatus::Done),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,
    pub task_id: TaskId,
    pub author_id: UserId,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<User>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub column_id: ColumnId,
    #[serde(default)]
    pub assignee_id: Option<UserId>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub hours_used: Option<f64>,
    #[serde(default)]
    pub completed_hours: Option<f64>,
    #[serde(default)]
    pub position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<User>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

impl Task {
    pub fn new(id: TaskId, column_id: ColumnId, title: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            description: None,
            column_id,
            assignee_id: None,
            priority: Priority::default(),
            tags: BTreeSet::new(),
            due_date: None,
            estimated_hours: None,
            hours_used: None,
            completed_hours: None,
            position: 0,
            assignee: None,
            comments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub board_id: BoardId,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ColumnStatus>,
}

impl Column {
    /// Explicit status if present, otherwise inferred from the column name.
    pub fn effective_status(&self) -> Option<ColumnStatus> {
        self.status.or_else(|| ColumnStatus::infer_from_name(&self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Board {
    pub fn column(&self, column_id: ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_mut(&mut self, column_id: ColumnId) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == column_id)
    }

    /// Insert `column` before the first column with a greater position.
    pub fn insert_column(&mut self, column: Column) {
        let at = self
            .columns
            .iter()
            .position(|c| c.position > column.position)
            .unwrap_or(self.columns.len());
        self.columns.insert(at, column);
    }

    pub fn remove_column(&mut self, column_id: ColumnId) -> Option<Column> {
        let at = self.columns.iter().position(|c| c.id == column_id)?;
        Some(self.columns.remove(at))
    }

    /// Locate a task as (column index, task index).
    pub fn locate_task(&self, task_id: TaskId) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(ci, col)| {
            col.tasks
                .iter()
                .position(|t| t.id == task_id)
                .map(|ti| (ci, ti))
        })
    }

    pub fn task(&self, task_id: TaskId) -> Option<&Task> {
        self.locate_task(task_id)
            .map(|(ci, ti)| &self.columns[ci].tasks[ti])
    }

    pub fn task_mut(&mut self, task_id: TaskId) -> Option<&mut Task> {
        let (ci, ti) = self.locate_task(task_id)?;
        Some(&mut self.columns[ci].tasks[ti])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.columns.iter().flat_map(|c| c.tasks.iter())
    }

    pub fn task_count(&self) -> usize {
        self.columns.iter().map(|c| c.tasks.len()).sum()
    }

    /// Remove a task wherever it lives. Returns the removed task.
    pub fn remove_task(&mut self, task_id: TaskId) -> Option<Task> {
        let (ci, ti) = self.locate_task(task_id)?;
        Some(self.columns[ci].tasks.remove(ti))
    }

    pub fn comment_mut(&mut self, comment_id: CommentId) -> Option<&mut Comment> {
        self.columns
            .iter_mut()
            .flat_map(|c| c.tasks.iter_mut())
            .flat_map(|t| t.comments.iter_mut())
            .find(|c| c.id == comment_id)
    }

    pub fn remove_comment(&mut self, comment_id: CommentId) -> Option<Comment> {
        self.columns
            .iter_mut()
            .flat_map(|c| c.tasks.iter_mut())
            .find_map(|t| {
                let at = t.comments.iter().position(|c| c.id == comment_id)?;
                Some(t.comments.remove(at))
            })
    }
}

/// Body for creating or renaming a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewColumn {
    pub name: String,
    pub position: i64,
}

/// Board list entry; columns are not hydrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardSummary {
    pub id: BoardId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub column_id: ColumnId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<UserId>,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
}

impl NewTask {
    pub fn new(column_id: ColumnId, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            column_id,
            assignee_id: None,
            priority: Priority::default(),
            tags: BTreeSet::new(),
            due_date: None,
            estimated_hours: None,
        }
    }
}

/// Partial task update. `None` leaves the field untouched; the assignee uses a
/// nested option so it can be cleared with `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Option<UserId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours_used: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_hours: Option<f64>,
}

impl TaskPatch {
    pub fn reassign(assignee_id: Option<UserId>) -> Self {
        Self {
            assignee_id: Some(assignee_id),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Name of the first hour field holding a negative or non-finite value.
    pub fn invalid_hours(&self) -> Option<&'static str> {
        [
            ("estimated_hours", self.estimated_hours),
            ("hours_used", self.hours_used),
            ("completed_hours", self.completed_hours),
        ]
        .into_iter()
        .find(|(_, v)| v.is_some_and(|h| !h.is_finite() || h < 0.0))
        .map(|(name, _)| name)
    }

    /// Apply the patch onto a task in place.
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(description) = &self.description {
            task.description = Some(description.clone());
        }
        if let Some(assignee_id) = self.assignee_id {
            if task.assignee_id != assignee_id {
                task.assignee = None;
            }
            task.assignee_id = assignee_id;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(tags) = &self.tags {
            task.tags = tags.clone();
        }
        if let Some(due_date) = &self.due_date {
            task.due_date = Some(due_date.clone());
        }
        if self.estimated_hours.is_some() {
            task.estimated_hours = self.estimated_hours;
        }
        if self.hours_used.is_some() {
            task.hours_used = self.hours_used;
        }
        if self.completed_hours.is_some() {
            task.completed_hours = self.completed_hours;
        }
    }
}

/// Someone currently viewing the selected board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub username: String,
}
