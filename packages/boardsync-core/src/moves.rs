/// Drag-and-drop task moves applied to a board snapshot.
///
/// A move is described by where the task was dragged from and where it was
/// dropped, as positions in the columns' task sequences. Validation happens
/// against the current snapshot; nothing is mutated when it fails.
use crate::types::{Board, ColumnId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveRequest {
    pub task_id: TaskId,
    pub source_column: ColumnId,
    pub source_index: usize,
    pub dest_column: ColumnId,
    pub dest_index: usize,
}

impl MoveRequest {
    pub fn is_noop(&self) -> bool {
        self.source_column == self.dest_column && self.source_index == self.dest_index
    }
}

/// An optimistically applied move awaiting the server's verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingMove {
    pub request: MoveRequest,
    pub snapshot: Board,
    /// Position of this move in the order moves were applied.
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MoveRejected {
    #[error("Column {0} is not on this board")]
    UnknownColumn(ColumnId),

    #[error("Task {task_id} is not at position {index} of column {column_id}")]
    TaskNotAtSource {
        task_id: TaskId,
        column_id: ColumnId,
        index: usize,
    },

    #[error("Position {index} is out of range for column {column_id} (0-{max})")]
    DestinationOutOfRange {
        column_id: ColumnId,
        index: usize,
        max: usize,
    },

    #[error("Task {0} already has a move in flight")]
    AlreadyPending(TaskId),
}

/// Check a move against `board` without touching it.
pub fn validate(board: &Board, req: &MoveRequest) -> Result<(), MoveRejected> {
    let source = board
        .column(req.source_column)
        .ok_or(MoveRejected::UnknownColumn(req.source_column))?;
    let dest = board
        .column(req.dest_column)
        .ok_or(MoveRejected::UnknownColumn(req.dest_column))?;

    match source.tasks.get(req.source_index) {
        Some(task) if task.id == req.task_id => {}
        _ => {
            return Err(MoveRejected::TaskNotAtSource {
                task_id: req.task_id,
                column_id: req.source_column,
                index: req.source_index,
            })
        }
    }

    // Within one column the task is removed first, so the last valid slot
    // is the current length minus one.
    let max = if req.source_column == req.dest_column {
        dest.tasks.len() - 1
    } else {
        dest.tasks.len()
    };
    if req.dest_index > max {
        return Err(MoveRejected::DestinationOutOfRange {
            column_id: req.dest_column,
            index: req.dest_index,
            max,
        });
    }
    Ok(())
}

/// Produce the post-move board. The input is left untouched; the returned
/// board shares no structure with it.
pub fn apply_move(board: &Board, req: &MoveRequest) -> Result<Board, MoveRejected> {
    validate(board, req)?;

    let mut next = board.clone();
    let source_pos = position_of(&next, req.source_column)?;
    let mut task = next.columns[source_pos].tasks.remove(req.source_index);
    if req.source_column != req.dest_column {
        task.column_id = req.dest_column;
    }

    let dest_pos = position_of(&next, req.dest_column)?;
    next.columns[dest_pos].tasks.insert(req.dest_index, task);
    Ok(next)
}

fn position_of(board: &Board, column_id: ColumnId) -> Result<usize, MoveRejected> {
    board
        .columns
        .iter()
        .position(|c| c.id == column_id)
        .ok_or(MoveRejected::UnknownColumn(column_id))
}
