//! Position Reconciler: turns a new visual order into `position` writes.

use crate::api::RemoteStore;
use crate::board;
use crate::error::{Error, Result};
use crate::models::{Task, TaskPatch};
use crate::session::Session;
use futures::future::join_all;
use tracing::{error, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionUpdate {
    pub id: i64,
    pub position: i64,
}

/// Idle -> Reordering -> Idle. While reordering, the order being written is
/// held here and shown in place of the confirmed one.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ReorderState {
    #[default]
    Idle,
    Reordering { order: Vec<i64> },
}

impl ReorderState {
    pub fn is_busy(&self) -> bool {
        matches!(self, ReorderState::Reordering { .. })
    }

    pub fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() {
            Err(Error::ReorderInProgress)
        } else {
            Ok(())
        }
    }
}

/// Dense 1-based positions for `tasks` in the given order.
pub fn assign_positions(tasks: &[Task]) -> Vec<PositionUpdate> {
    tasks
        .iter()
        .enumerate()
        .map(|(index, task)| PositionUpdate {
            id: task.id,
            position: index as i64 + 1,
        })
        .collect()
}

/// Only the assignments that differ from what each task already stores.
pub fn position_updates(tasks: &[Task]) -> Vec<PositionUpdate> {
    tasks
        .iter()
        .zip(assign_positions(tasks))
        .filter(|(task, update)| task.position != Some(update.position))
        .map(|(_, update)| update)
        .collect()
}

#[derive(Debug, Default)]
pub struct ReorderReport {
    pub applied: Vec<i64>,
    pub failed: Vec<(i64, Error)>,
}

impl ReorderReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Issues every write concurrently and waits for all of them. A failed
/// write is logged and recorded; writes that succeeded are not undone.
pub async fn apply_position_updates(
    store: &dyn RemoteStore,
    session: &Session,
    updates: &[PositionUpdate],
) -> ReorderReport {
    let writes = updates.iter().map(|update| async move {
        let patch = TaskPatch::position(update.position);
        (update.id, store.update_task(session, update.id, &patch).await)
    });

    let mut report = ReorderReport::default();
    for (id, result) in join_all(writes).await {
        match result {
            Ok(_) => report.applied.push(id),
            Err(err) => {
                error!(task_id = id, error = %err, "failed to update task position");
                report.failed.push((id, err));
            }
        }
    }
    info!(
        applied = report.applied.len(),
        failed = report.failed.len(),
        "reorder written"
    );
    report
}

/// Writes the positions, then reloads the authoritative list.
pub async fn reconcile(
    store: &dyn RemoteStore,
    session: &Session,
    updates: &[PositionUpdate],
) -> (ReorderReport, Result<Vec<Task>>) {
    let report = apply_position_updates(store, session, updates).await;
    let refreshed = board::fetch_tasks(store, session).await;
    (report, refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockRemoteStore;
    use crate::filter::tests::task;
    use crate::models::TaskStatus;
    use crate::session::tests::session;

    fn positioned(id: i64, position: Option<i64>) -> Task {
        Task {
            position,
            ..task(id, &format!("task {}", id), TaskStatus::Pending, None)
        }
    }

    #[test]
    fn test_assign_positions_is_dense_and_ordered() {
        let tasks = vec![positioned(7, Some(3)), positioned(2, None), positioned(9, Some(1))];
        let positions: Vec<(i64, i64)> = assign_positions(&tasks)
            .into_iter()
            .map(|u| (u.id, u.position))
            .collect();
        assert_eq!(positions, vec![(7, 1), (2, 2), (9, 3)]);
    }

    #[test]
    fn test_assign_positions_empty() {
        assert!(assign_positions(&[]).is_empty());
    }

    #[test]
    fn test_position_updates_skip_unchanged() {
        let tasks = vec![positioned(1, Some(1)), positioned(3, Some(3)), positioned(2, Some(2))];
        assert_eq!(
            position_updates(&tasks),
            vec![
                PositionUpdate { id: 3, position: 2 },
                PositionUpdate { id: 2, position: 3 },
            ]
        );
    }

    #[test]
    fn test_unset_positions_are_written() {
        let tasks = vec![positioned(1, None), positioned(2, Some(2))];
        assert_eq!(
            position_updates(&tasks),
            vec![PositionUpdate { id: 1, position: 1 }]
        );
    }

    #[test]
    fn test_reordering_state_refuses_work() {
        let state = ReorderState::Reordering { order: vec![1, 2] };
        assert!(matches!(state.ensure_idle(), Err(Error::ReorderInProgress)));
        assert!(ReorderState::Idle.ensure_idle().is_ok());
    }

    #[tokio::test]
    async fn test_partial_failure_is_reported_not_rolled_back() {
        let mut store = MockRemoteStore::new();
        store
            .expect_update_task()
            .withf(|_, id, patch| *id == 1 && patch.position == Some(2))
            .times(1)
            .returning(|_, _, _| Ok(positioned(1, Some(2))));
        store
            .expect_update_task()
            .withf(|_, id, _| *id == 2)
            .times(1)
            .returning(|_, _, _| {
                Err(Error::Backend {
                    status: 500,
                    message: "boom".into(),
                })
            });

        let updates = [
            PositionUpdate { id: 1, position: 2 },
            PositionUpdate { id: 2, position: 1 },
        ];
        let report = apply_position_updates(&store, &session(), &updates).await;
        assert_eq!(report.applied, vec![1]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 2);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_reconcile_refetches_after_writes() {
        let mut store = MockRemoteStore::new();
        store
            .expect_update_task()
            .times(2)
            .returning(|_, id, patch| Ok(positioned(id, patch.position)));
        store.expect_fetch_tasks().times(1).returning(|_| {
            Ok(vec![
                Task {
                    status: TaskStatus::Completed,
                    ..positioned(2, Some(1))
                },
                positioned(1, Some(2)),
            ])
        });

        let updates = [
            PositionUpdate { id: 2, position: 1 },
            PositionUpdate { id: 1, position: 2 },
        ];
        let (report, refreshed) = reconcile(&store, &session(), &updates).await;
        assert!(report.is_clean());
        let ids: Vec<i64> = refreshed.unwrap().iter().map(|t| t.id).collect();
        // baseline ordering is applied to the refetched list
        assert_eq!(ids, vec![1, 2]);
    }
}
