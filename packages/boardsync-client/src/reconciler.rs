/// Async orchestration around [`BoardState`].
///
/// Local mutations are applied optimistically under the state lock, then the
/// matching command is awaited with the lock released, then the outcome is
/// folded back in. Remote events arrive through dispatcher callbacks; the
/// reloads they request are queued and performed by [`Reconciler::run`] (or
/// on demand via [`Reconciler::process_reloads`]).
use boardsync_core::board_state::{BoardState, MoveStart, Reaction, Rollback, StateError};
use boardsync_core::event::{BoardEvent, EventKind};
use boardsync_core::filter::BoardFilter;
use boardsync_core::moves::MoveRequest;
use boardsync_core::types::{
    Board, BoardId, Column, ColumnId, Comment, CommentId, NewColumn, NewTask, OnlineUser, Task,
    TaskId, TaskPatch, UserId,
};
use boardsync_core::{EventDispatcher, HandlerId};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};

use crate::api::{ApiError, CommandApi};

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    NoOp,
    Committed,
}

pub struct Reconciler<A> {
    api: Arc<A>,
    state: Arc<Mutex<BoardState>>,
    reload_tx: mpsc::UnboundedSender<BoardId>,
    reload_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BoardId>>>,
}

impl<A> Clone for Reconciler<A> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            state: self.state.clone(),
            reload_tx: self.reload_tx.clone(),
            reload_rx: self.reload_rx.clone(),
        }
    }
}

impl<A: CommandApi + 'static> Reconciler<A> {
    pub fn new(api: Arc<A>) -> Self {
        let (reload_tx, reload_rx) = mpsc::unbounded_channel();
        Self {
            api,
            state: Arc::new(Mutex::new(BoardState::new())),
            reload_tx,
            reload_rx: Arc::new(tokio::sync::Mutex::new(reload_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the current state.
    pub fn with_state<R>(&self, f: impl FnOnce(&BoardState) -> R) -> R {
        f(&self.lock())
    }

    // --- selection ---

    /// Fetch `board_id` and make it the selected board.
    pub async fn select_board(&self, board_id: BoardId) -> Result<(), ReconcileError> {
        let board = self.api.get_board(board_id).await?;
        self.lock().select_board(board);
        Ok(())
    }

    pub fn clear_selection(&self) {
        self.lock().clear_selection();
    }

    /// Refetch the selected board. Returns whether a fresh copy was installed.
    pub async fn reload(&self) -> Result<bool, ApiError> {
        let Some(board_id) = self.lock().selected_board_id() else {
            return Ok(false);
        };
        let board = self.api.get_board(board_id).await?;
        let mut state = self.lock();
        if state.is_dragging() {
            log::debug!("[reconciler] Discarding reload of board {}: drag started", board_id);
            return Ok(false);
        }
        Ok(state.install_board(board))
    }

    // --- local mutations ---

    pub fn begin_drag(&self) {
        self.lock().begin_drag();
    }

    pub fn cancel_drag(&self) {
        self.lock().cancel_drag();
    }

    /// Drop a dragged task: apply the move locally, then confirm it with the
    /// server. A rejected command restores the pre-move board. When that
    /// rollback also undid moves made after this one, a reload is queued.
    pub async fn move_task(&self, req: MoveRequest) -> Result<MoveOutcome, ReconcileError> {
        let start = self.lock().begin_move(req)?;
        let req = match start {
            MoveStart::NoOp => return Ok(MoveOutcome::NoOp),
            MoveStart::Applied(req) => req,
        };

        match self
            .api
            .move_task(req.task_id, req.dest_column, req.dest_index)
            .await
        {
            Ok(()) => {
                self.lock().confirm_move(req.task_id);
                log::debug!("[reconciler] Move of task {} committed", req.task_id);
                Ok(MoveOutcome::Committed)
            }
            Err(e) => {
                let rollback = self.lock().fail_move(req.task_id, &e.user_message());
                if let Rollback::RestoredStale(board_id) = rollback {
                    let _ = self.reload_tx.send(board_id);
                }
                Err(e.into())
            }
        }
    }

    pub async fn update_task(&self, task_id: TaskId, patch: TaskPatch) -> Result<Task, ReconcileError> {
        let previous = self.lock().begin_update(task_id, &patch)?;
        match self.api.update_task(task_id, &patch).await {
            Ok(task) => {
                self.lock().upsert_task(task.clone());
                Ok(task)
            }
            Err(e) => {
                self.lock().revert_update(previous, &e.user_message());
                Err(e.into())
            }
        }
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), ReconcileError> {
        self.lock().begin_delete(task_id)?;
        if let Err(e) = self.api.delete_task(task_id).await {
            self.lock()
                .record_error(format!("Failed to delete task: {}", e.user_message()));
            self.reload_quietly().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn create_task(&self, task: NewTask) -> Result<Task, ReconcileError> {
        let board_id = self
            .lock()
            .selected_board_id()
            .ok_or(StateError::NoBoardSelected)?;
        match self.api.create_task(board_id, &task).await {
            Ok(created) => {
                self.lock().upsert_task(created.clone());
                Ok(created)
            }
            Err(e) => {
                self.lock()
                    .record_error(format!("Failed to create task: {}", e.user_message()));
                Err(e.into())
            }
        }
    }

    /// Move every task assigned to `from` over to `to`. Any failed update
    /// forces a full reload. Returns the number of tasks reassigned.
    pub async fn reassign_user(&self, from: UserId, to: Option<UserId>) -> Result<usize, ReconcileError> {
        let touched = self.lock().begin_reassign(from, to)?;
        let patch = TaskPatch::reassign(to);
        for task_id in &touched {
            if let Err(e) = self.api.update_task(*task_id, &patch).await {
                self.lock()
                    .record_error(format!("Failed to reassign tasks: {}", e.user_message()));
                self.reload_quietly().await;
                return Err(e.into());
            }
        }
        Ok(touched.len())
    }

    pub async fn add_comment(&self, task_id: TaskId, content: &str) -> Result<Comment, ReconcileError> {
        match self.api.create_comment(task_id, content).await {
            Ok(comment) => {
                self.lock().append_comment(comment.clone());
                Ok(comment)
            }
            Err(e) => {
                self.lock()
                    .record_error(format!("Failed to add comment: {}", e.user_message()));
                Err(e.into())
            }
        }
    }

    /// Create a column after the last one. The server assigns the id, so
    /// nothing is shown until it answers.
    pub async fn create_column(&self, name: &str) -> Result<Column, ReconcileError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StateError::EmptyColumnName.into());
        }
        let (board_id, position) = {
            let state = self.lock();
            let board = state.board().ok_or(StateError::NoBoardSelected)?;
            let position = board.columns.iter().map(|c| c.position + 1).max().unwrap_or(0);
            (board.id, position)
        };
        let body = NewColumn {
            name: name.to_string(),
            position,
        };
        match self.api.create_column(board_id, &body).await {
            Ok(column) => {
                self.lock().insert_column(column.clone());
                Ok(column)
            }
            Err(e) => {
                self.lock()
                    .record_error(format!("Failed to create column: {}", e.user_message()));
                Err(e.into())
            }
        }
    }

    /// Rename a column optimistically. A rejected rename forces a reload.
    pub async fn rename_column(&self, column_id: ColumnId, name: &str) -> Result<(), ReconcileError> {
        let body = self.lock().begin_rename_column(column_id, name)?;
        match self.api.update_column(column_id, &body).await {
            Ok(column) => {
                self.lock().apply_column(&column);
                Ok(())
            }
            Err(e) => {
                self.lock()
                    .record_error(format!("Failed to rename column: {}", e.user_message()));
                self.reload_quietly().await;
                Err(e.into())
            }
        }
    }

    pub async fn delete_column(&self, column_id: ColumnId) -> Result<(), ReconcileError> {
        self.lock().begin_delete_column(column_id)?;
        if let Err(e) = self.api.delete_column(column_id).await {
            self.lock()
                .record_error(format!("Failed to delete column: {}", e.user_message()));
            self.reload_quietly().await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn update_comment(&self, comment_id: CommentId, content: &str) -> Result<Comment, ReconcileError> {
        self.lock().begin_update_comment(comment_id, content)?;
        match self.api.update_comment(comment_id, content).await {
            Ok(comment) => {
                self.lock().replace_comment(comment.clone());
                Ok(comment)
            }
            Err(e) => {
                self.lock()
                    .record_error(format!("Failed to edit comment: {}", e.user_message()));
                self.reload_quietly().await;
                Err(e.into())
            }
        }
    }

    pub async fn delete_comment(&self, comment_id: CommentId) -> Result<(), ReconcileError> {
        self.lock().begin_delete_comment(comment_id)?;
        if let Err(e) = self.api.delete_comment(comment_id).await {
            self.lock()
                .record_error(format!("Failed to delete comment: {}", e.user_message()));
            self.reload_quietly().await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn reload_quietly(&self) {
        if let Err(e) = self.reload().await {
            log::warn!("[reconciler] Reload failed: {}", e);
        }
    }

    // --- remote events ---

    /// Fold a remote event into state, queueing a reload when requested.
    pub fn handle_event(&self, event: &BoardEvent) -> Reaction {
        let reaction = self.lock().handle_event(event);
        if let Reaction::Reload(board_id) = reaction {
            let _ = self.reload_tx.send(board_id);
        }
        reaction
    }

    /// Subscribe to every event kind on `dispatcher`.
    pub fn attach(&self, dispatcher: &EventDispatcher) -> Vec<(EventKind, HandlerId)> {
        EventKind::ALL
            .into_iter()
            .map(|kind| {
                let this = self.clone();
                let id = dispatcher.on(kind, move |event| {
                    this.handle_event(event);
                });
                (kind, id)
            })
            .collect()
    }

    pub fn detach(&self, dispatcher: &EventDispatcher, handlers: &[(EventKind, HandlerId)]) {
        for (kind, id) in handlers {
            dispatcher.off(*kind, *id);
        }
    }

    /// Perform queued reloads now. Bursts collapse into a single fetch.
    /// Returns the number of requests consumed. While [`Reconciler::run`] is
    /// serving the queue this returns 0 without waiting.
    pub async fn process_reloads(&self) -> usize {
        let Ok(mut rx) = self.reload_rx.try_lock() else {
            log::debug!("[reconciler] Reload worker owns the queue");
            return 0;
        };
        let mut consumed = 0;
        while rx.try_recv().is_ok() {
            consumed += 1;
        }
        drop(rx);
        if consumed > 0 {
            self.reload_quietly().await;
        }
        consumed
    }

    /// Reload worker: serve queued reloads until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut rx = self.reload_rx.lock().await;
        loop {
            tokio::select! {
                Some(board_id) = rx.recv() => {
                    let mut extra = 0;
                    while rx.try_recv().is_ok() {
                        extra += 1;
                    }
                    log::debug!(
                        "[reconciler] Reloading board {} ({} coalesced requests)",
                        board_id,
                        extra
                    );
                    self.reload_quietly().await;
                }
                _ = shutdown.changed() => {
                    log::info!("[reconciler] Reload worker stopping");
                    break;
                }
            }
        }
    }

    // --- read side ---

    pub fn view(&self) -> Option<Board> {
        self.lock().view()
    }

    pub fn set_filter(&self, filter: BoardFilter) {
        self.lock().set_filter(filter);
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.lock().online_users()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().is_connected()
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock().last_error().map(str::to_string)
    }

    pub fn take_error(&self) -> Option<String> {
        self.lock().take_error()
    }
}
