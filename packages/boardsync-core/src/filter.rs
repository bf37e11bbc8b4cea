/// Tag and text filtering over a board snapshot.
///
/// The filter is a pure projection: it never mutates the board it reads.
/// Text matching is case- and accent-insensitive.
use std::collections::BTreeSet;
use unicode_normalization::UnicodeNormalization;

use crate::types::{Board, Task};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardFilter {
    /// A task passes when it carries at least one of these tags.
    pub tags: BTreeSet<String>,
    /// Matched against title, assignee name and tag names.
    pub query: String,
}

impl BoardFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn is_active(&self) -> bool {
        !self.tags.is_empty() || !self.query.trim().is_empty()
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.matches_tags(task) && self.matches_query(task)
    }

    fn matches_tags(&self, task: &Task) -> bool {
        if self.tags.is_empty() {
            return true;
        }
        let wanted: Vec<String> = self.tags.iter().map(|t| normalize_for_search(t)).collect();
        task.tags
            .iter()
            .any(|tag| wanted.contains(&normalize_for_search(tag)))
    }

    fn matches_query(&self, task: &Task) -> bool {
        let needle = normalize_for_search(self.query.trim());
        if needle.is_empty() {
            return true;
        }
        if contains_text(&task.title, &needle) {
            return true;
        }
        if let Some(user) = &task.assignee {
            let name = if user.full_name.is_empty() {
                &user.username
            } else {
                &user.full_name
            };
            if contains_text(name, &needle) {
                return true;
            }
        }
        task.tags.iter().any(|t| contains_text(t, &needle))
    }

    /// Project `board` through the filter. Column order and the relative
    /// order of surviving tasks are preserved; empty columns are kept.
    pub fn apply(&self, board: &Board) -> Board {
        let mut view = board.clone();
        if !self.is_active() {
            return view;
        }
        for column in &mut view.columns {
            column.tasks.retain(|t| self.matches(t));
        }
        view
    }
}

fn normalize_for_search(value: &str) -> String {
    value
        .to_lowercase()
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect()
}

fn contains_text(haystack: &str, normalized_needle: &str) -> bool {
    normalize_for_search(haystack).contains(normalized_needle)
}
