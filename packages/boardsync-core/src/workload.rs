/// Per-assignee workload metrics derived from a board.
use serde::Serialize;
use std::collections::BTreeMap;

use crate::types::{Board, ColumnStatus, Task, UserId};

/// Grouping key: an assignee or the unassigned bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignee {
    User(UserId),
    Unassigned,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkloadMetrics {
    pub not_done_count: usize,
    pub done_count: usize,
    pub hours_not_done: f64,
    pub hours_done: f64,
    /// Capacity minus open hours, when a capacity is known.
    pub remaining_hours: Option<f64>,
    pub wip_count: usize,
    pub completion_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssigneeWorkload {
    pub assignee: Assignee,
    pub task_ids: Vec<i64>,
    pub metrics: WorkloadMetrics,
}

/// Done when the column says so; for columns without a known status, when
/// the completed hours reach a positive estimate.
fn is_done(task: &Task, status: Option<ColumnStatus>) -> bool {
    match status {
        Some(status) => status == ColumnStatus::Done,
        None => {
            let estimate = task.estimated_hours.unwrap_or(0.0);
            let completed = task.completed_hours.unwrap_or(0.0);
            estimate > 0.0 && completed >= estimate
        }
    }
}

fn is_wip(task: &Task, status: Option<ColumnStatus>, done: bool) -> bool {
    match status {
        Some(status) => status == ColumnStatus::InProgress,
        None => !done && task.hours_used.unwrap_or(0.0) > 0.0,
    }
}

pub fn compute_metrics<'a, I>(tasks: I, capacity_hours: Option<f64>) -> WorkloadMetrics
where
    I: IntoIterator<Item = (&'a Task, Option<ColumnStatus>)>,
{
    let mut m = WorkloadMetrics::default();
    for (task, status) in tasks {
        let estimate = task.estimated_hours.unwrap_or(0.0);
        let done = is_done(task, status);
        if done {
            m.done_count += 1;
            m.hours_done += estimate;
        } else {
            m.not_done_count += 1;
            m.hours_not_done += estimate;
        }
        if is_wip(task, status, done) {
            m.wip_count += 1;
        }
    }
    let total = m.done_count + m.not_done_count;
    m.completion_ratio = if total == 0 {
        0.0
    } else {
        m.done_count as f64 / total as f64
    };
    m.remaining_hours = capacity_hours.map(|c| c - m.hours_not_done);
    m
}

/// Group every task on the board by assignee. `capacity` supplies weekly
/// hours per user where known.
pub fn workload_by_assignee(
    board: &Board,
    capacity: &BTreeMap<UserId, f64>,
) -> Vec<AssigneeWorkload> {
    let mut groups: BTreeMap<Assignee, Vec<(&Task, Option<ColumnStatus>)>> = BTreeMap::new();
    for column in &board.columns {
        let status = column.effective_status();
        for task in &column.tasks {
            let key = task.assignee_id.map_or(Assignee::Unassigned, Assignee::User);
            groups.entry(key).or_default().push((task, status));
        }
    }
    groups
        .into_iter()
        .map(|(assignee, tasks)| {
            let cap = match assignee {
                Assignee::User(id) => capacity.get(&id).copied(),
                Assignee::Unassigned => None,
            };
            AssigneeWorkload {
                assignee,
                task_ids: tasks.iter().map(|(t, _)| t.id).collect(),
                metrics: compute_metrics(tasks, cap),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::tests::sample_board;

    #[test]
    fn test_metrics_follow_column_status() {
        let mut board = sample_board();
        for id in [10, 11, 20] {
            let task = board.task_mut(id).unwrap();
            task.assignee_id = Some(1);
            task.estimated_hours = Some(2.0);
        }
        let capacity = BTreeMap::from([(1, 10.0)]);
        let groups = workload_by_assignee(&board, &capacity);
        assert_eq!(groups.len(), 1);
        let m = &groups[0].metrics;
        assert_eq!(m.done_count, 1);
        assert_eq!(m.not_done_count, 2);
        assert_eq!(m.hours_not_done, 4.0);
        assert_eq!(m.remaining_hours, Some(6.0));
        assert!((m.completion_ratio - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_status_falls_back_to_hours() {
        let mut done = Task::new(1, 1, "a");
        done.estimated_hours = Some(3.0);
        done.completed_hours = Some(3.0);
        let mut busy = Task::new(2, 1, "b");
        busy.hours_used = Some(1.0);
        let m = compute_metrics([(&done, None), (&busy, None)], None);
        assert_eq!(m.done_count, 1);
        assert_eq!(m.wip_count, 1);
        assert_eq!(m.remaining_hours, None);
    }

    #[test]
    fn test_unassigned_bucket_sorts_last() {
        let mut board = sample_board();
        board.task_mut(10).unwrap().assignee_id = Some(7);
        let groups = workload_by_assignee(&board, &BTreeMap::new());
        assert_eq!(groups[0].assignee, Assignee::User(7));
        assert_eq!(groups[1].assignee, Assignee::Unassigned);
        assert_eq!(groups[1].task_ids, vec![11, 20]);
    }

    #[test]
    fn test_empty_input() {
        let m = compute_metrics(std::iter::empty::<(&Task, Option<ColumnStatus>)>(), Some(5.0));
        assert_eq!(m.completion_ratio, 0.0);
        assert_eq!(m.remaining_hours, Some(5.0));
    }
}
