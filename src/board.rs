//! Local task list of the signed-in user and the gateway calls that feed it.
//!
//! The free async functions talk to the store and are safe to run on a
//! background task; [`TaskBoard`] owns what the screen shows and is only
//! touched from the event loop.

use crate::api::RemoteStore;
use crate::error::{Error, Result};
use crate::filter::{baseline_order, visible_tasks, FilterOptions};
use crate::models::{Task, TaskDraft, TaskPatch, TaskStatus};
use crate::reorder::{position_updates, PositionUpdate, ReorderReport, ReorderState};
use crate::session::Session;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// A value as last confirmed by the store, plus an optional local value
/// awaiting the store's answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Optimistic<T> {
    confirmed: T,
    pending: Option<T>,
}

impl<T> Optimistic<T> {
    pub fn new(confirmed: T) -> Self {
        Optimistic {
            confirmed,
            pending: None,
        }
    }

    pub fn current(&self) -> &T {
        self.pending.as_ref().unwrap_or(&self.confirmed)
    }

    pub fn confirmed(&self) -> &T {
        &self.confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn stage(&mut self, value: T) {
        self.pending = Some(value);
    }

    pub fn confirm(&mut self, value: T) {
        self.confirmed = value;
        self.pending = None;
    }

    pub fn rollback(&mut self) -> Option<T> {
        self.pending.take()
    }
}

pub async fn fetch_tasks(store: &dyn RemoteStore, session: &Session) -> Result<Vec<Task>> {
    let tasks = store.fetch_tasks(session).await?;
    debug!(count = tasks.len(), "tasks fetched");
    Ok(baseline_order(tasks))
}

pub async fn create_task(store: &dyn RemoteStore, session: &Session, draft: TaskDraft) -> Result<Task> {
    let draft = draft.validated()?;
    store
        .insert_task(session, &draft.into_new_task(session.user.id))
        .await
}

pub async fn edit_task(
    store: &dyn RemoteStore,
    session: &Session,
    id: i64,
    draft: TaskDraft,
) -> Result<Task> {
    let draft = draft.validated()?;
    store.update_task(session, id, &TaskPatch::edit(&draft)).await
}

pub async fn set_status(
    store: &dyn RemoteStore,
    session: &Session,
    id: i64,
    status: TaskStatus,
) -> Result<Task> {
    store
        .update_task(session, id, &TaskPatch::status(status))
        .await
}

/// Sent even when the id is not in the local list.
pub async fn delete_task(store: &dyn RemoteStore, session: &Session, id: i64) -> Result<()> {
    store.delete_task(session, id).await
}

#[derive(Debug, Default)]
pub struct TaskBoard {
    entries: Vec<Optimistic<Task>>,
    reorder: ReorderState,
    loaded: bool,
    generation: u64,
}

impl TaskBoard {
    pub fn new() -> Self {
        TaskBoard::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Bumped whenever a reorder starts or ends. A fetch issued under an
    /// older generation no longer reflects the stored order.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_reordering(&self) -> bool {
        self.reorder.is_busy()
    }

    /// Gate for every mutation: nothing may be issued while positions are
    /// being written.
    pub fn ensure_idle(&self) -> Result<()> {
        self.reorder.ensure_idle()
    }

    /// Replaces the list with a fresh fetch. Pending toggles are dropped.
    pub fn load(&mut self, tasks: Vec<Task>) {
        self.entries = tasks.into_iter().map(Optimistic::new).collect();
        self.loaded = true;
    }

    /// Current values, in the order being written while a reorder is in
    /// flight.
    pub fn tasks(&self) -> Vec<Task> {
        let current: Vec<Task> = self.entries.iter().map(|e| e.current().clone()).collect();
        match &self.reorder {
            ReorderState::Idle => current,
            ReorderState::Reordering { order } => order
                .iter()
                .filter_map(|id| current.iter().find(|t| t.id == *id).cloned())
                .collect(),
        }
    }

    pub fn get(&self, id: i64) -> Option<&Task> {
        self.entries
            .iter()
            .map(Optimistic::current)
            .find(|t| t.id == id)
    }

    /// Whether a change to `id` is still waiting for the store.
    pub fn is_staged(&self, id: i64) -> bool {
        self.entries
            .iter()
            .any(|e| e.confirmed().id == id && e.is_pending())
    }

    pub fn visible(&self, query: &str, filters: &FilterOptions, now: DateTime<Utc>) -> Vec<Task> {
        visible_tasks(&self.tasks(), query, filters, now)
    }

    fn entry_mut(&mut self, id: i64) -> Option<&mut Optimistic<Task>> {
        self.entries.iter_mut().find(|e| e.confirmed().id == id)
    }

    /// Shows the flipped status immediately and returns it for the write.
    pub fn stage_toggle(&mut self, id: i64) -> Result<TaskStatus> {
        self.ensure_idle()?;
        let entry = self
            .entry_mut(id)
            .ok_or_else(|| Error::NotFound(format!("task {}", id)))?;
        let mut staged = entry.current().clone();
        staged.status = staged.status.toggled();
        let status = staged.status;
        entry.stage(staged);
        Ok(status)
    }

    /// Applies the store's answer to a staged change.
    pub fn settle(&mut self, id: i64, result: &Result<Task>) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        match result {
            Ok(row) => {
                entry.confirm(row.clone());
                // keep pending before completed, as after a fetch
                self.entries.sort_by_key(|e| e.confirmed().status);
            }
            Err(err) => {
                warn!(task_id = id, error = %err, "discarding staged change");
                entry.rollback();
            }
        }
    }

    pub fn remove(&mut self, id: i64) {
        self.entries.retain(|e| e.confirmed().id != id);
    }

    /// Produces the full order after moving `id` by `offset` slots, clamped
    /// to the ends of the list.
    pub fn moved(&self, id: i64, offset: isize) -> Option<Vec<Task>> {
        let mut tasks = self.tasks();
        let from = tasks.iter().position(|t| t.id == id)?;
        let last = tasks.len().checked_sub(1)? as isize;
        let to = (from as isize + offset).clamp(0, last) as usize;
        if to == from {
            return None;
        }
        let task = tasks.remove(from);
        tasks.insert(to, task);
        Some(tasks)
    }

    /// Enters the reordering state with `new_order` shown and returns the
    /// writes to issue. When no position changes, nothing is entered and the
    /// list is empty.
    pub fn begin_reorder(&mut self, new_order: &[Task]) -> Result<Vec<PositionUpdate>> {
        self.ensure_idle()?;

        let mut expected: Vec<i64> = self.entries.iter().map(|e| e.confirmed().id).collect();
        let mut given: Vec<i64> = new_order.iter().map(|t| t.id).collect();
        expected.sort_unstable();
        given.sort_unstable();
        if expected != given {
            return Err(Error::Validation(
                "Reorder must contain exactly the current tasks.".into(),
            ));
        }

        let updates = position_updates(new_order);
        if !updates.is_empty() {
            self.generation += 1;
            self.reorder = ReorderState::Reordering {
                order: new_order.iter().map(|t| t.id).collect(),
            };
        }
        Ok(updates)
    }

    /// Leaves the reordering state. A successful refetch becomes the list;
    /// otherwise the attempted order is kept with the positions that were
    /// written.
    pub fn finish_reorder(&mut self, report: &ReorderReport, refreshed: Result<Vec<Task>>) {
        let state = std::mem::take(&mut self.reorder);
        self.generation += 1;
        match refreshed {
            Ok(tasks) => self.load(tasks),
            Err(err) => {
                warn!(error = %err, "refetch after reorder failed, keeping local order");
                if let ReorderState::Reordering { order } = state {
                    let mut kept = Vec::with_capacity(order.len());
                    for (index, id) in order.iter().enumerate() {
                        if let Some(pos) = self.entries.iter().position(|e| e.confirmed().id == *id) {
                            let mut entry = self.entries.remove(pos);
                            if report.applied.contains(id) {
                                let mut task = entry.confirmed().clone();
                                task.position = Some(index as i64 + 1);
                                entry.confirm(task);
                            }
                            kept.push(entry);
                        }
                    }
                    kept.append(&mut self.entries);
                    self.entries = kept;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockRemoteStore;
    use crate::filter::tests::task;
    use crate::reorder::reconcile;
    use crate::session::tests::session;

    fn ids(tasks: &[Task]) -> Vec<i64> {
        tasks.iter().map(|t| t.id).collect()
    }

    fn board() -> TaskBoard {
        let mut board = TaskBoard::new();
        board.load(vec![
            task(1, "one", TaskStatus::Pending, None),
            task(2, "two", TaskStatus::Pending, None),
            task(3, "three", TaskStatus::Completed, None),
        ]);
        board
    }

    #[test]
    fn test_optimistic_two_phase() {
        let mut value = Optimistic::new(1);
        value.stage(2);
        assert_eq!(*value.current(), 2);
        assert_eq!(*value.confirmed(), 1);
        assert_eq!(value.rollback(), Some(2));
        assert_eq!(*value.current(), 1);
        value.stage(3);
        value.confirm(4);
        assert!(!value.is_pending());
        assert_eq!(*value.current(), 4);
    }

    #[tokio::test]
    async fn test_fetch_applies_baseline_order() {
        let mut store = MockRemoteStore::new();
        store.expect_fetch_tasks().returning(|_| {
            Ok(vec![
                task(1, "done", TaskStatus::Completed, None),
                task(2, "todo", TaskStatus::Pending, None),
            ])
        });
        let tasks = fetch_tasks(&store, &session()).await.unwrap();
        assert_eq!(ids(&tasks), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_create_inserts_pending_task_for_session_user() {
        let mut store = MockRemoteStore::new();
        store
            .expect_insert_task()
            .withf(|session, new_task| {
                new_task.user_id == session.user.id
                    && new_task.status == TaskStatus::Pending
                    && new_task.title == "Buy milk"
            })
            .times(1)
            .returning(|_, _| Ok(task(5, "Buy milk", TaskStatus::Pending, None)));
        let draft = TaskDraft {
            title: " Buy milk ".into(),
            ..Default::default()
        };
        let created = create_task(&store, &session(), draft).await.unwrap();
        assert_eq!(created.id, 5);
    }

    #[tokio::test]
    async fn test_create_with_blank_title_issues_nothing() {
        let mut store = MockRemoteStore::new();
        store.expect_insert_task().never();
        let result = create_task(&store, &session(), TaskDraft::default()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_edit_sends_title_message_and_date() {
        let mut store = MockRemoteStore::new();
        store
            .expect_update_task()
            .withf(|_, id, patch| {
                *id == 2
                    && patch.title.as_deref() == Some("two!")
                    && patch.status.is_none()
                    && patch.position.is_none()
            })
            .times(1)
            .returning(|_, _, _| Ok(task(2, "two!", TaskStatus::Pending, None)));
        let draft = TaskDraft {
            title: "two!".into(),
            ..Default::default()
        };
        edit_task(&store, &session(), 2, draft).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_unknown_id_still_issues_request() {
        let mut store = MockRemoteStore::new();
        store
            .expect_delete_task()
            .withf(|_, id| *id == 99)
            .times(1)
            .returning(|_, _| Err(Error::NotFound("task 99".into())));

        let mut board = board();
        let result = delete_task(&store, &session(), 99).await;
        assert!(result.is_err());
        board.remove(99);
        assert_eq!(ids(&board.tasks()), vec![1, 2, 3]);
    }

    #[test]
    fn test_toggle_confirm_and_rollback() {
        let mut board = board();
        assert_eq!(board.stage_toggle(1).unwrap(), TaskStatus::Completed);
        assert!(board.get(1).unwrap().status.is_completed());

        board.settle(1, &Err(Error::Auth("expired".into())));
        assert_eq!(board.get(1).unwrap().status, TaskStatus::Pending);

        board.stage_toggle(1).unwrap();
        board.settle(1, &Ok(task(1, "one", TaskStatus::Completed, None)));
        assert_eq!(board.get(1).unwrap().status, TaskStatus::Completed);

        // second toggle returns to the original status
        assert_eq!(board.stage_toggle(1).unwrap(), TaskStatus::Pending);
    }

    #[test]
    fn test_confirmed_toggle_regroups() {
        let mut board = board();
        board.stage_toggle(1).unwrap();
        assert_eq!(ids(&board.tasks()), vec![1, 2, 3]);

        board.settle(1, &Ok(task(1, "one", TaskStatus::Completed, None)));
        assert_eq!(ids(&board.tasks()), vec![2, 1, 3]);

        board.stage_toggle(3).unwrap();
        board.settle(3, &Ok(task(3, "three", TaskStatus::Pending, None)));
        assert_eq!(ids(&board.tasks()), vec![2, 3, 1]);
    }

    #[test]
    fn test_reorder_bumps_generation() {
        let mut board = board();
        let start = board.generation();

        let same = board.tasks();
        let mut positioned = same.clone();
        for (i, t) in positioned.iter_mut().enumerate() {
            t.position = Some(i as i64 + 1);
        }
        board.load(positioned.clone());
        assert!(board.begin_reorder(&positioned).unwrap().is_empty());
        assert_eq!(board.generation(), start);

        let new_order = board.moved(2, -1).unwrap();
        board.begin_reorder(&new_order).unwrap();
        assert_eq!(board.generation(), start + 1);
        board.finish_reorder(&ReorderReport::default(), Ok(new_order));
        assert_eq!(board.generation(), start + 2);
    }

    #[test]
    fn test_toggle_unknown_task() {
        let mut board = board();
        assert!(matches!(board.stage_toggle(42), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_moved_clamps_to_bounds() {
        let board = board();
        assert_eq!(ids(&board.moved(1, 1).unwrap()), vec![2, 1, 3]);
        assert_eq!(ids(&board.moved(3, -10).unwrap()), vec![3, 1, 2]);
        assert!(board.moved(1, -1).is_none());
        assert!(board.moved(77, 1).is_none());
    }

    #[test]
    fn test_begin_reorder_blocks_other_mutations() {
        let mut board = board();
        let new_order = board.moved(3, -2).unwrap();
        let updates = board.begin_reorder(&new_order).unwrap();
        assert_eq!(updates.len(), 3);
        assert!(board.is_reordering());
        assert_eq!(ids(&board.tasks()), vec![3, 1, 2]);

        assert!(matches!(board.stage_toggle(1), Err(Error::ReorderInProgress)));
        assert!(matches!(
            board.begin_reorder(&new_order),
            Err(Error::ReorderInProgress)
        ));
    }

    #[test]
    fn test_begin_reorder_rejects_foreign_ids() {
        let mut board = board();
        let bogus = vec![task(1, "one", TaskStatus::Pending, None)];
        assert!(matches!(
            board.begin_reorder(&bogus),
            Err(Error::Validation(_))
        ));
        assert!(!board.is_reordering());
    }

    #[test]
    fn test_unchanged_order_stays_idle() {
        let mut board = TaskBoard::new();
        let mut first = task(1, "one", TaskStatus::Pending, None);
        first.position = Some(1);
        let mut second = task(2, "two", TaskStatus::Pending, None);
        second.position = Some(2);
        board.load(vec![first, second]);

        let same = board.tasks();
        assert!(board.begin_reorder(&same).unwrap().is_empty());
        assert!(!board.is_reordering());
    }

    #[tokio::test]
    async fn test_full_reorder_cycle() {
        let mut store = MockRemoteStore::new();
        store
            .expect_update_task()
            .times(3)
            .returning(|_, id, patch| {
                let mut row = task(id, "t", TaskStatus::Pending, None);
                row.position = patch.position;
                Ok(row)
            });
        store.expect_fetch_tasks().times(1).returning(|_| {
            Ok(vec![
                task(2, "two", TaskStatus::Pending, None),
                task(1, "one", TaskStatus::Pending, None),
                task(3, "three", TaskStatus::Completed, None),
            ])
        });

        let mut board = board();
        let new_order = board.moved(2, -1).unwrap();
        let updates = board.begin_reorder(&new_order).unwrap();
        let positions: Vec<i64> = updates.iter().map(|u| u.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);

        let (report, refreshed) = reconcile(&store, &session(), &updates).await;
        board.finish_reorder(&report, refreshed);
        assert!(!board.is_reordering());
        assert_eq!(ids(&board.tasks()), vec![2, 1, 3]);
        assert!(board.ensure_idle().is_ok());
    }

    #[test]
    fn test_failed_refetch_keeps_attempted_order() {
        let mut board = board();
        let new_order = board.moved(3, -2).unwrap();
        board.begin_reorder(&new_order).unwrap();

        let report = ReorderReport {
            applied: vec![3, 1],
            failed: vec![(2, Error::Validation("x".into()))],
        };
        board.finish_reorder(&report, Err(Error::Auth("expired".into())));

        let tasks = board.tasks();
        assert_eq!(ids(&tasks), vec![3, 1, 2]);
        assert_eq!(tasks[0].position, Some(1));
        assert_eq!(tasks[1].position, Some(2));
        assert_eq!(tasks[2].position, None);
        assert!(!board.is_reordering());
    }
}
