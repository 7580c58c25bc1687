use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Completion flag as stored by the backend: `0` pending, `1` completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum TaskStatus {
    #[default]
    Pending,
    Completed,
}

impl TaskStatus {
    pub fn toggled(self) -> TaskStatus {
        match self {
            TaskStatus::Pending => TaskStatus::Completed,
            TaskStatus::Completed => TaskStatus::Pending,
        }
    }

    pub fn is_completed(self) -> bool {
        self == TaskStatus::Completed
    }
}

impl From<u8> for TaskStatus {
    fn from(value: u8) -> Self {
        if value == 0 {
            TaskStatus::Pending
        } else {
            TaskStatus::Completed
        }
    }
}

impl From<TaskStatus> for u8 {
    fn from(status: TaskStatus) -> Self {
        match status {
            TaskStatus::Pending => 0,
            TaskStatus::Completed => 1,
        }
    }
}

// Task row
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Task {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub message: Option<String>,
    pub status: TaskStatus,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub do_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub position: Option<i64>,
    pub user_id: i64,
}

// Insert body for the tasks table
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewTask {
    pub title: String,
    pub message: Option<String>,
    pub status: TaskStatus,
    pub do_at: Option<DateTime<Utc>>,
    pub user_id: i64,
}

/// Partial update for a task row. `None` fields are left untouched; the
/// nested options on `message` and `do_at` allow clearing a column.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_at: Option<Option<DateTime<Utc>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<i64>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn position(position: i64) -> Self {
        TaskPatch {
            position: Some(position),
            ..Default::default()
        }
    }

    pub fn edit(draft: &TaskDraft) -> Self {
        TaskPatch {
            title: Some(draft.title.clone()),
            message: Some(draft.message.clone()),
            do_at: Some(draft.do_at),
            ..Default::default()
        }
    }
}

// What the task form produces, before it becomes an insert or a patch
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub message: Option<String>,
    pub do_at: Option<DateTime<Utc>>,
}

impl TaskDraft {
    pub fn validated(self) -> Result<TaskDraft> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(Error::Validation("Task title cannot be empty.".into()));
        }
        let message = self
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        Ok(TaskDraft {
            title,
            message,
            do_at: self.do_at,
        })
    }

    pub fn into_new_task(self, user_id: i64) -> NewTask {
        NewTask {
            title: self.title,
            message: self.message,
            status: TaskStatus::Pending,
            do_at: self.do_at,
            user_id,
        }
    }
}

// Application-level profile row in the users table
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub status: i32,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status != 0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewUser {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub status: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct UserPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
}

/// Identity returned by the auth API. `access_token` is absent when the
/// backend requires e-mail confirmation before issuing a session.
#[derive(Clone, Debug, PartialEq)]
pub struct AuthIdentity {
    pub id: String,
    pub email: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct NotationSummary {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Notation {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "timestamp::deserialize_opt")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NewNotation {
    pub user_id: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NotationPatch {
    pub title: String,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

pub mod timestamp {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
    use serde::{de, Deserialize, Deserializer};

    /// Accepts RFC 3339, a naive date-time (read as UTC) or a bare date.
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(naive.and_utc());
            }
        }
        NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize_opt<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) if s.trim().is_empty() => Ok(None),
            Some(s) => parse(&s)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("invalid timestamp `{}`", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_toggle_twice_restores_status() {
        for status in [TaskStatus::Pending, TaskStatus::Completed] {
            assert_eq!(status.toggled().toggled(), status);
            assert_ne!(status.toggled(), status);
        }
    }

    #[test]
    fn test_task_row_deserializes_with_missing_optionals() {
        let row = json!({
            "id": 7,
            "title": "Buy milk",
            "message": null,
            "status": 0,
            "do_at": null,
            "created_at": "2024-03-01T10:15:00.123456+00:00",
            "user_id": 3
        });
        let task: Task = serde_json::from_value(row).unwrap();
        assert_eq!(task.id, 7);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.do_at, None);
        assert_eq!(task.position, None);
        assert!(task.created_at.is_some());
    }

    #[test]
    fn test_timestamps_in_several_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(timestamp::parse("2024-01-01"), Some(expected));
        assert_eq!(timestamp::parse("2024-01-01T00:00:00"), Some(expected));
        assert_eq!(timestamp::parse("2024-01-01 00:00:00"), Some(expected));
        assert_eq!(timestamp::parse("2024-01-01T03:00:00+03:00"), Some(expected));
        assert_eq!(timestamp::parse("yesterday"), None);
    }

    #[test]
    fn test_completed_status_serializes_as_one() {
        let patch = TaskPatch::status(TaskStatus::Completed);
        assert_eq!(serde_json::to_value(&patch).unwrap(), json!({ "status": 1 }));
    }

    #[test]
    fn test_edit_patch_can_clear_due_date() {
        let draft = TaskDraft {
            title: "Call Ana".into(),
            message: None,
            do_at: None,
        };
        let value = serde_json::to_value(TaskPatch::edit(&draft)).unwrap();
        assert_eq!(
            value,
            json!({ "title": "Call Ana", "message": null, "do_at": null })
        );
    }

    #[test]
    fn test_draft_rejects_blank_title() {
        let draft = TaskDraft {
            title: "   ".into(),
            ..Default::default()
        };
        assert!(matches!(draft.validated(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_draft_trims_and_drops_empty_message() {
        let draft = TaskDraft {
            title: "  Water plants ".into(),
            message: Some("  ".into()),
            do_at: None,
        }
        .validated()
        .unwrap();
        assert_eq!(draft.title, "Water plants");
        assert_eq!(draft.message, None);
        let new_task = draft.into_new_task(9);
        assert_eq!(new_task.status, TaskStatus::Pending);
        assert_eq!(new_task.user_id, 9);
    }
}
