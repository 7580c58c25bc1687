//! Free-form notations.

use crate::api::RemoteStore;
use crate::error::{Error, Result};
use crate::models::{Notation, NotationPatch, NotationSummary};
use crate::session::Session;
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

pub const TITLE_MAX_CHARS: usize = 30;

pub async fn list_notations(store: &dyn RemoteStore, session: &Session) -> Result<Vec<NotationSummary>> {
    store.fetch_notations(session).await
}

/// Inserts an empty notation owned by the session user.
pub async fn create_notation(store: &dyn RemoteStore, session: &Session) -> Result<Notation> {
    let notation = store.insert_notation(session).await?;
    info!(notation_id = notation.id, "notation created");
    Ok(notation)
}

pub async fn open_notation(store: &dyn RemoteStore, session: &Session, id: i64) -> Result<Notation> {
    store.fetch_notation(session, id).await
}

/// Writes title and body, stamps `updated_at`, and returns the reloaded row.
pub async fn save_notation(
    store: &dyn RemoteStore,
    session: &Session,
    id: i64,
    title: &str,
    message: &str,
    now: DateTime<Utc>,
) -> Result<Notation> {
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(Error::Validation(format!(
            "Title must be at most {} characters.",
            TITLE_MAX_CHARS
        )));
    }
    let patch = NotationPatch {
        title: title.trim().to_string(),
        message: message.to_string(),
        updated_at: now,
    };
    store.update_notation(session, id, &patch).await?;
    store.fetch_notation(session, id).await
}

pub async fn delete_notation(store: &dyn RemoteStore, session: &Session, id: i64) -> Result<()> {
    store.delete_notation(session, id).await?;
    info!(notation_id = id, "notation deleted");
    Ok(())
}

pub fn display_title(title: Option<&str>) -> &str {
    match title.map(str::trim) {
        Some(t) if !t.is_empty() => t,
        _ => "Untitled",
    }
}

pub fn format_updated<Tz: TimeZone>(at: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    at.with_timezone(tz).format("%d/%m/%Y %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockRemoteStore;
    use crate::session::tests::session;

    fn notation(id: i64, title: &str) -> Notation {
        Notation {
            id,
            title: Some(title.to_string()),
            message: Some(String::new()),
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn test_save_stamps_and_reloads() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 8, 30, 0).unwrap();
        let mut store = MockRemoteStore::new();
        store
            .expect_update_notation()
            .withf(move |_, id, patch| {
                *id == 4 && patch.title == "Groceries" && patch.updated_at == now
            })
            .times(1)
            .returning(|_, id, _| Ok(notation(id, "Groceries")));
        store
            .expect_fetch_notation()
            .withf(|_, id| *id == 4)
            .times(1)
            .returning(|_, id| Ok(notation(id, "Groceries")));

        let saved = save_notation(&store, &session(), 4, " Groceries ", "eggs", now)
            .await
            .unwrap();
        assert_eq!(saved.title.as_deref(), Some("Groceries"));
    }

    #[tokio::test]
    async fn test_save_rejects_long_title() {
        let mut store = MockRemoteStore::new();
        store.expect_update_notation().never();
        let title = "x".repeat(TITLE_MAX_CHARS + 1);
        let result = save_notation(&store, &session(), 1, &title, "", Utc::now()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_create_returns_blank_notation() {
        let mut store = MockRemoteStore::new();
        store.expect_insert_notation().times(1).returning(|_| {
            Ok(Notation {
                id: 11,
                title: None,
                message: None,
                updated_at: None,
            })
        });
        let created = create_notation(&store, &session()).await.unwrap();
        assert_eq!(created.id, 11);
        assert_eq!(display_title(created.title.as_deref()), "Untitled");
    }

    #[test]
    fn test_format_updated() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 9, 7, 0).unwrap();
        assert_eq!(format_updated(at, &Utc), "05/01/2024 09:07");
    }
}
