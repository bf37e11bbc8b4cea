/// Authoritative local state for the selected board.
///
/// Holds the live board tree, the drag guard, presence, the active filter and
/// any optimistic mutations still waiting on the server. Everything here is
/// synchronous; the caller issues the matching command and reports the
/// outcome back through `confirm_*` / `fail_*` / `revert_*`.
///
/// Remote events are folded in through [`BoardState::handle_event`], which
/// answers with a [`Reaction`] telling the caller whether a full reload from
/// the command API is required.
use std::collections::{BTreeMap, BTreeSet};

use crate::event::{BoardEvent, CommentNotice, PresenceNotice};
use crate::filter::BoardFilter;
use crate::moves::{self, MoveRejected, MoveRequest, PendingMove};
use crate::types::{
    Board, BoardId, Column, ColumnId, Comment, CommentId, NewColumn, OnlineUser, Task, TaskId,
    TaskPatch, User, UserId,
};

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("No board selected")]
    NoBoardSelected,

    #[error("Task {0} not found on the selected board")]
    TaskNotFound(TaskId),

    #[error("Column {0} not found on the selected board")]
    ColumnNotFound(ColumnId),

    #[error("Comment {0} not found on the selected board")]
    CommentNotFound(CommentId),

    #[error("Column name must not be empty")]
    EmptyColumnName,

    #[error("Invalid value for {field}: hours must be non-negative")]
    InvalidPatch { field: &'static str },

    #[error(transparent)]
    Move(#[from] MoveRejected),
}

/// What a remote event did to local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reaction {
    /// Not for the selected board, or nothing to do.
    Ignored,
    /// Held back while a drag is in progress. Reloads are dropped; deletes
    /// are applied once the drag ends.
    Suppressed,
    /// The caller must refetch this board and install it.
    Reload(BoardId),
    /// The task tree was patched locally.
    Applied,
    PresenceChanged,
    ConnectivityChanged,
}

/// Outcome of dropping a dragged task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveStart {
    /// Dropped where it was picked up; no command to send.
    NoOp,
    /// Optimistically applied; send the move command.
    Applied(MoveRequest),
}

/// Outcome of rolling back a rejected move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rollback {
    /// No move was pending for the task, or another board is selected now.
    Skipped,
    /// The pre-move board is live again.
    Restored,
    /// Restored, but moves applied after this one were undone with it even
    /// though the server may have accepted them. The board must be refetched.
    RestoredStale(BoardId),
}

#[derive(Debug, Default)]
pub struct BoardState {
    board: Option<Board>,
    dragging: bool,
    deferred_deletes: BTreeSet<TaskId>,
    online_users: BTreeMap<UserId, String>,
    filter: BoardFilter,
    pending_moves: BTreeMap<TaskId, PendingMove>,
    moves_applied: u64,
    last_error: Option<String>,
    connected: bool,
}

impl BoardState {
    pub fn new() -> Self {
        Self::default()
    }

    // --- selection ---

    /// Switch to `board`. Drag guard, pending moves and the filter belong to
    /// the previous snapshot and are dropped. Presence and connectivity follow
    /// the push channel, so they survive reselecting the same board.
    pub fn select_board(&mut self, board: Board) {
        log::info!("[board_state] Selected board {} ({})", board.id, board.name);
        let switching = self.selected_board_id() != Some(board.id);
        self.board = Some(board);
        self.reset_board_scoped(switching);
    }

    pub fn clear_selection(&mut self) {
        self.board = None;
        self.reset_board_scoped(true);
    }

    fn reset_board_scoped(&mut self, channel_changed: bool) {
        self.dragging = false;
        self.deferred_deletes.clear();
        self.pending_moves.clear();
        self.filter = BoardFilter::default();
        if channel_changed {
            self.online_users.clear();
            self.connected = false;
        }
    }

    pub fn selected_board_id(&self) -> Option<BoardId> {
        self.board.as_ref().map(|b| b.id)
    }

    pub fn board(&self) -> Option<&Board> {
        self.board.as_ref()
    }

    /// Replace the snapshot with a freshly fetched copy. Returns false when the
    /// fetched board is no longer the selected one.
    pub fn install_board(&mut self, board: Board) -> bool {
        if self.selected_board_id() != Some(board.id) {
            log::debug!(
                "[board_state] Discarding fetched board {}; selection changed",
                board.id
            );
            return false;
        }
        self.board = Some(board);
        true
    }

    fn board_mut(&mut self) -> Result<&mut Board, StateError> {
        self.board.as_mut().ok_or(StateError::NoBoardSelected)
    }

    // --- drag & move ---

    pub fn begin_drag(&mut self) {
        self.dragging = true;
    }

    /// Drag released outside any drop target.
    pub fn cancel_drag(&mut self) {
        self.end_drag();
    }

    /// Clear the guard and apply remote deletes that arrived during the drag.
    fn end_drag(&mut self) {
        self.dragging = false;
        for task_id in std::mem::take(&mut self.deferred_deletes) {
            log::debug!("[board_state] Applying deferred delete of {}", task_id);
            self.apply_remote_delete(task_id);
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    pub fn has_pending_move(&self, task_id: TaskId) -> bool {
        self.pending_moves.contains_key(&task_id)
    }

    /// Drop a dragged task. The drag ends whatever the outcome. On
    /// [`MoveStart::Applied`] the live board already reflects the move and the
    /// pre-move board is kept for rollback.
    pub fn begin_move(&mut self, req: MoveRequest) -> Result<MoveStart, StateError> {
        let result = self.try_begin_move(req);
        self.end_drag();
        if let Err(e) = &result {
            log::debug!("[board_state] Move of task {} aborted: {}", req.task_id, e);
        }
        result
    }

    fn try_begin_move(&mut self, req: MoveRequest) -> Result<MoveStart, StateError> {
        let board = self.board.as_ref().ok_or(StateError::NoBoardSelected)?;
        moves::validate(board, &req)?;
        if req.is_noop() {
            return Ok(MoveStart::NoOp);
        }
        if self.pending_moves.contains_key(&req.task_id) {
            return Err(MoveRejected::AlreadyPending(req.task_id).into());
        }

        let next = moves::apply_move(board, &req)?;
        let snapshot = std::mem::replace(self.board_mut()?, next);
        self.moves_applied += 1;
        self.pending_moves.insert(
            req.task_id,
            PendingMove {
                request: req,
                snapshot,
                seq: self.moves_applied,
            },
        );
        Ok(MoveStart::Applied(req))
    }

    /// The server accepted the move; forget the rollback snapshot.
    pub fn confirm_move(&mut self, task_id: TaskId) -> bool {
        self.pending_moves.remove(&task_id).is_some()
    }

    /// The server rejected the move: restore the pre-move board wholesale and
    /// record `message` for the user.
    pub fn fail_move(&mut self, task_id: TaskId, message: &str) -> Rollback {
        let Some(pending) = self.pending_moves.remove(&task_id) else {
            return Rollback::Skipped;
        };
        self.record_error(format!("Failed to move task: {}", message));
        let board_id = pending.snapshot.id;
        if self.selected_board_id() != Some(board_id) {
            return Rollback::Skipped;
        }
        log::warn!(
            "[board_state] Rolling back move of task {} on board {}",
            task_id,
            board_id
        );
        self.board = Some(pending.snapshot);
        if pending.seq != self.moves_applied {
            log::warn!(
                "[board_state] Rollback of task {} discarded later moves; refetch needed",
                task_id
            );
            return Rollback::RestoredStale(board_id);
        }
        Rollback::Restored
    }

    // --- other optimistic mutations ---

    /// Apply `patch` locally and return the task as it was before.
    pub fn begin_update(&mut self, task_id: TaskId, patch: &TaskPatch) -> Result<Task, StateError> {
        if let Some(field) = patch.invalid_hours() {
            return Err(StateError::InvalidPatch { field });
        }
        let task = self
            .board_mut()?
            .task_mut(task_id)
            .ok_or(StateError::TaskNotFound(task_id))?;
        let previous = task.clone();
        patch.apply_to(task);
        Ok(previous)
    }

    /// Put `previous` back in place of the optimistic patch.
    pub fn revert_update(&mut self, previous: Task, message: &str) {
        self.record_error(format!("Failed to update task: {}", message));
        if let Some(board) = self.board.as_mut() {
            if let Some(task) = board.task_mut(previous.id) {
                *task = previous;
            }
        }
    }

    /// Install the server's copy of a task. A changed column relocates it to
    /// the end of that column.
    pub fn upsert_task(&mut self, task: Task) -> bool {
        let Some(board) = self.board.as_mut() else {
            return false;
        };
        if let Some((ci, ti)) = board.locate_task(task.id) {
            if board.columns[ci].id == task.column_id {
                board.columns[ci].tasks[ti] = task;
                return true;
            }
            board.columns[ci].tasks.remove(ti);
        }
        match board.columns.iter_mut().find(|c| c.id == task.column_id) {
            Some(column) => {
                column.tasks.push(task);
                true
            }
            None => {
                log::warn!(
                    "[board_state] Task {} references unknown column {}",
                    task.id,
                    task.column_id
                );
                false
            }
        }
    }

    /// Remove a task optimistically and hand it back.
    pub fn begin_delete(&mut self, task_id: TaskId) -> Result<Task, StateError> {
        let removed = self
            .board_mut()?
            .remove_task(task_id)
            .ok_or(StateError::TaskNotFound(task_id))?;
        self.pending_moves.remove(&task_id);
        Ok(removed)
    }

    /// Point every task assigned to `from` at `to`. Returns the ids touched.
    pub fn begin_reassign(&mut self, from: UserId, to: Option<UserId>) -> Result<Vec<TaskId>, StateError> {
        let board = self.board_mut()?;
        let patch = TaskPatch::reassign(to);
        let mut touched = Vec::new();
        for column in &mut board.columns {
            for task in &mut column.tasks {
                if task.assignee_id == Some(from) {
                    patch.apply_to(task);
                    touched.push(task.id);
                }
            }
        }
        Ok(touched)
    }

    /// Drop a task the server deleted, including from rollback snapshots so a
    /// later rollback cannot bring it back.
    fn apply_remote_delete(&mut self, task_id: TaskId) -> bool {
        for pending in self.pending_moves.values_mut() {
            pending.snapshot.remove_task(task_id);
        }
        self.begin_delete(task_id).is_ok()
    }

    /// Install a column the server created.
    pub fn insert_column(&mut self, column: Column) -> bool {
        let Some(board) = self.board.as_mut() else {
            return false;
        };
        if column.board_id != board.id || board.column(column.id).is_some() {
            return false;
        }
        board.insert_column(column);
        true
    }

    /// Rename a column locally and return the body to send.
    pub fn begin_rename_column(&mut self, column_id: ColumnId, name: &str) -> Result<NewColumn, StateError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StateError::EmptyColumnName);
        }
        let column = self
            .board_mut()?
            .column_mut(column_id)
            .ok_or(StateError::ColumnNotFound(column_id))?;
        column.name = name.to_string();
        Ok(NewColumn {
            name: column.name.clone(),
            position: column.position,
        })
    }

    /// Take the server's name and position for a column, keeping local tasks.
    pub fn apply_column(&mut self, column: &Column) -> bool {
        let Some(local) = self.board.as_mut().and_then(|b| b.column_mut(column.id)) else {
            return false;
        };
        local.name = column.name.clone();
        local.position = column.position;
        if column.status.is_some() {
            local.status = column.status;
        }
        true
    }

    /// Remove a column and its tasks optimistically and hand it back.
    pub fn begin_delete_column(&mut self, column_id: ColumnId) -> Result<Column, StateError> {
        let removed = self
            .board_mut()?
            .remove_column(column_id)
            .ok_or(StateError::ColumnNotFound(column_id))?;
        for task in &removed.tasks {
            self.pending_moves.remove(&task.id);
        }
        Ok(removed)
    }

    /// Replace a comment's content locally and return it as it was before.
    pub fn begin_update_comment(&mut self, comment_id: CommentId, content: &str) -> Result<Comment, StateError> {
        let comment = self
            .board_mut()?
            .comment_mut(comment_id)
            .ok_or(StateError::CommentNotFound(comment_id))?;
        let previous = comment.clone();
        comment.content = content.to_string();
        Ok(previous)
    }

    /// Install the server's copy of a comment.
    pub fn replace_comment(&mut self, comment: Comment) -> bool {
        match self.board.as_mut().and_then(|b| b.comment_mut(comment.id)) {
            Some(local) => {
                *local = comment;
                true
            }
            None => self.append_comment(comment),
        }
    }

    pub fn begin_delete_comment(&mut self, comment_id: CommentId) -> Result<Comment, StateError> {
        self.board_mut()?
            .remove_comment(comment_id)
            .ok_or(StateError::CommentNotFound(comment_id))
    }

    /// Append a comment to its task unless it is already there.
    pub fn append_comment(&mut self, comment: Comment) -> bool {
        let Some(task) = self
            .board
            .as_mut()
            .and_then(|b| b.task_mut(comment.task_id))
        else {
            return false;
        };
        if task.comments.iter().any(|c| c.id == comment.id) {
            return false;
        }
        task.comments.push(comment);
        true
    }

    // --- remote events ---

    pub fn handle_event(&mut self, event: &BoardEvent) -> Reaction {
        if let (Some(event_board), Some(selected)) = (event.board_id(), self.selected_board_id()) {
            if event_board != selected {
                return Reaction::Ignored;
            }
        }

        match event {
            BoardEvent::Connected { .. } => {
                self.connected = true;
                Reaction::ConnectivityChanged
            }
            BoardEvent::Disconnected { .. } => {
                self.connected = false;
                Reaction::ConnectivityChanged
            }
            BoardEvent::TransportError { message } => {
                log::debug!("[board_state] Transport error: {}", message);
                Reaction::Ignored
            }
            BoardEvent::TaskCreated(_) | BoardEvent::TaskUpdated(_) | BoardEvent::TaskMoved(_) => {
                self.request_reload(event)
            }
            BoardEvent::TaskDeleted(notice) => {
                if self.board.is_none() {
                    return Reaction::Ignored;
                }
                if self.dragging {
                    log::debug!("[board_state] Deferring remote delete of {} during drag", notice.id);
                    self.deferred_deletes.insert(notice.id);
                    return Reaction::Suppressed;
                }
                if self.apply_remote_delete(notice.id) {
                    Reaction::Applied
                } else {
                    Reaction::Ignored
                }
            }
            BoardEvent::CommentCreated(notice) => {
                if self.append_comment(comment_from_notice(notice)) {
                    Reaction::Applied
                } else {
                    Reaction::Ignored
                }
            }
            BoardEvent::UserJoinedBoard(notice) => {
                if self.board.is_none() {
                    return Reaction::Ignored;
                }
                self.online_users.insert(notice.user_id, display_name(notice));
                Reaction::PresenceChanged
            }
            BoardEvent::UserLeftBoard(notice) => {
                if self.online_users.remove(&notice.user_id).is_some() {
                    Reaction::PresenceChanged
                } else {
                    Reaction::Ignored
                }
            }
        }
    }

    fn request_reload(&self, event: &BoardEvent) -> Reaction {
        let Some(board_id) = self.selected_board_id() else {
            return Reaction::Ignored;
        };
        if self.dragging {
            log::debug!("[board_state] Suppressed reload for {} during drag", event.kind());
            return Reaction::Suppressed;
        }
        Reaction::Reload(board_id)
    }

    // --- presence, connectivity, filter, errors ---

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.online_users
            .iter()
            .map(|(id, name)| OnlineUser {
                user_id: *id,
                username: name.clone(),
            })
            .collect()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_filter(&mut self, filter: BoardFilter) {
        self.filter = filter;
    }

    pub fn filter(&self) -> &BoardFilter {
        &self.filter
    }

    /// Board as it should be rendered: filtered, except while dragging where
    /// indices must match the raw tree.
    pub fn view(&self) -> Option<Board> {
        let board = self.board.as_ref()?;
        if self.dragging {
            return Some(board.clone());
        }
        Some(self.filter.apply(board))
    }

    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[board_state] {}", message);
        self.last_error = Some(message);
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn take_error(&mut self) -> Option<String> {
        self.last_error.take()
    }
}

fn display_name(notice: &PresenceNotice) -> String {
    notice
        .username
        .clone()
        .unwrap_or_else(|| format!("user {}", notice.user_id))
}

fn comment_from_notice(notice: &CommentNotice) -> Comment {
    Comment {
        id: notice.id,
        content: notice.content.clone(),
        task_id: notice.task_id,
        author_id: notice.author_id,
        created_at: chrono::Utc::now().to_rfc3339(),
        author: notice.author_name.as_ref().map(|name| User {
            id: notice.author_id,
            username: name.clone(),
            full_name: String::new(),
            email: String::new(),
        }),
    }
}
