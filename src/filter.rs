//! Turns the raw task list plus search text and filter options into the
//! ordered list shown on screen.

use crate::models::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Date,
    Created,
    Alphabetical,
}

impl SortBy {
    pub const ALL: [SortBy; 3] = [SortBy::Date, SortBy::Created, SortBy::Alphabetical];

    pub fn label(self) -> &'static str {
        match self {
            SortBy::Date => "Due date",
            SortBy::Created => "Creation",
            SortBy::Alphabetical => "A-Z",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FilterOptions {
    pub show_completed: bool,
    pub show_pending: bool,
    pub show_overdue: bool,
    pub sort_by: SortBy,
}

impl Default for FilterOptions {
    fn default() -> Self {
        FilterOptions {
            show_completed: true,
            show_pending: true,
            show_overdue: true,
            sort_by: SortBy::Date,
        }
    }
}

/// A pending task whose due date is strictly before `now`.
pub fn is_overdue(task: &Task, now: DateTime<Utc>) -> bool {
    task.status == TaskStatus::Pending && task.do_at.is_some_and(|due| due < now)
}

fn matches(task: &Task, needle: &str, filters: &FilterOptions, now: DateTime<Utc>) -> bool {
    if !needle.is_empty() && !task.title.to_lowercase().contains(needle) {
        return false;
    }
    let status_shown = match task.status {
        TaskStatus::Completed => filters.show_completed,
        TaskStatus::Pending => filters.show_pending,
    };
    status_shown && (filters.show_overdue || !is_overdue(task, now))
}

/// Filters then stably sorts `tasks`. The input is left untouched.
pub fn visible_tasks(
    tasks: &[Task],
    query: &str,
    filters: &FilterOptions,
    now: DateTime<Utc>,
) -> Vec<Task> {
    let needle = query.to_lowercase();
    let mut visible: Vec<Task> = tasks
        .iter()
        .filter(|task| matches(task, &needle, filters, now))
        .cloned()
        .collect();

    match filters.sort_by {
        SortBy::Date => visible.sort_by(|a, b| missing_last(a.do_at, b.do_at)),
        SortBy::Created => visible.sort_by(|a, b| missing_last(a.created_at, b.created_at)),
        SortBy::Alphabetical => visible.sort_by(|a, b| collate(&a.title, &b.title)),
    }
    visible
}

/// Pending before completed, otherwise keeping the order the store returned.
pub fn baseline_order(mut tasks: Vec<Task>) -> Vec<Task> {
    tasks.sort_by_key(|task| task.status);
    tasks
}

// A missing value sorts after every present one.
fn missing_last<T: Ord>(a: Option<T>, b: Option<T>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Dictionary-style comparison: letters compare without accents or case
/// first, then accented after plain, then lowercase before uppercase.
pub fn collate(a: &str, b: &str) -> Ordering {
    let base = |s: &str| -> String { s.chars().flat_map(char::to_lowercase).map(fold_accent).collect() };
    base(a)
        .cmp(&base(b))
        .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        .then_with(|| b.cmp(a))
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
        'ç' => 'c',
        'è' | 'é' | 'ê' | 'ë' => 'e',
        'ì' | 'í' | 'î' | 'ï' => 'i',
        'ñ' => 'n',
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
        'ù' | 'ú' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        other => other,
    }
}
