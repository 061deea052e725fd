//! Sync-Up (drain the mutation queue) and Sync-Down (refresh the cache).
//!
//! Both runs are all-or-nothing per call: the first failure aborts the run
//! and is returned, while work already completed (collections overwritten,
//! entries confirmed) stays in place. A single-flight guard rejects a second
//! run that starts while another is still in progress.

use std::sync::Arc;

use chrono::{Datelike, Months, NaiveDate, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::fallback::with_fallback;
use crate::filter::Filter;
use crate::local_db_model::{Record, Table};
use crate::local_db_state::LocalStore;
use crate::mutation::{Mutation, PendingWrite, QueuedMutation};
use crate::network::NetworkMonitor;
use crate::remote::{OrderDraft, RemoteStore};

/// Rows written per table by one Sync-Down run, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDownReport {
    pub tables: Vec<(Table, usize)>,
}

impl SyncDownReport {
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(|(_, rows)| rows).sum()
    }

    pub fn rows_for(&self, table: Table) -> Option<usize> {
        self.tables.iter().find(|(t, _)| *t == table).map(|(_, rows)| *rows)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub pushed: usize,
    pub pulled: SyncDownReport,
}

/// Where a write ended up.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied,
    Queued(QueuedMutation),
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn LocalStore>,
    network: NetworkMonitor,
    running: Mutex<()>,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn RemoteStore>, store: Arc<dyn LocalStore>, network: NetworkMonitor) -> Self {
        Self {
            remote,
            store,
            network,
            running: Mutex::new(()),
        }
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.network
    }

    pub fn store(&self) -> &Arc<dyn LocalStore> {
        &self.store
    }

    /// Replaces every reference collection with a fresh remote snapshot.
    ///
    /// Collections written before a failing fetch are not rolled back.
    pub async fn sync_down(&self, rep_id: &str) -> AppResult<SyncDownReport> {
        if !self.network.is_online() {
            return Err(AppError::Offline("sync down"));
        }
        let _running = self.running.try_lock().map_err(|_| AppError::SyncInProgress)?;

        let mut report = SyncDownReport::default();
        for (table, filter) in sync_down_plan(rep_id, Utc::now().date_naive()) {
            let rows = self.remote.select(table, &filter).await?;
            self.store.set_collection(table, &rows).await?;
            debug!("Pulled {} rows into '{}'", rows.len(), table);
            report.tables.push((table, rows.len()));
        }

        info!("Sync-down complete: {} rows across {} tables", report.total_rows(), report.tables.len());
        Ok(report)
    }

    /// Drains the queue in FIFO order, returning how many entries were
    /// confirmed by the remote in this call.
    ///
    /// An insert rejected as a duplicate counts as already applied. Any other
    /// failure moves a fresh copy of the entry to the tail of the queue and
    /// aborts the run with the remote error, even if the re-queue itself
    /// fails (the entry then stays at the head).
    pub async fn sync_up(&self) -> AppResult<usize> {
        if !self.network.is_online() {
            return Err(AppError::Offline("sync up"));
        }
        let _running = self.running.try_lock().map_err(|_| AppError::SyncInProgress)?;

        let mut processed = 0;
        let mut last_seq = None;
        while let Some(entry) = self.store.next_pending(last_seq).await? {
            match self.remote.apply(entry.table, &entry.mutation, entry.idempotency_key).await {
                Ok(()) => {}
                Err(e) if e.is_duplicate() && matches!(entry.mutation, Mutation::Insert { .. }) => {
                    info!("Insert #{} on '{}' already present remotely, treating as applied", entry.seq, entry.table);
                }
                Err(e) => {
                    warn!(
                        "Sync-up aborted at #{} ({} on '{}'): {e}",
                        entry.seq,
                        entry.mutation.kind(),
                        entry.table
                    );
                    match self.store.requeue(&entry).await {
                        Ok(fresh) => info!("#{} re-queued as #{}", entry.seq, fresh.seq),
                        Err(store_err) => error!("#{} left in place, re-queue failed: {store_err}", entry.seq),
                    }
                    return Err(e.into());
                }
            }
            self.store.mark_synced(&entry).await?;
            last_seq = Some(entry.seq);
            processed += 1;
        }

        let purged = self.store.purge_synced().await?;
        info!("Sync-up complete: {processed} mutations applied, {purged} purged");
        Ok(processed)
    }

    /// Sync-Up followed by Sync-Down, so queued writes land before the
    /// cache is refreshed.
    pub async fn sync_all(&self, rep_id: &str) -> AppResult<SyncSummary> {
        let pushed = self.sync_up().await?;
        let pulled = self.sync_down(rep_id).await?;
        Ok(SyncSummary { pushed, pulled })
    }

    /// Applies a write directly when online, otherwise queues it.
    pub async fn write(&self, table: Table, mutation: Mutation) -> AppResult<WriteOutcome> {
        if self.network.is_online() {
            self.remote.apply(table, &mutation, Uuid::new_v4()).await?;
            return Ok(WriteOutcome::Applied);
        }
        let entry = self.store.enqueue(PendingWrite::new(table, mutation)).await?;
        Ok(WriteOutcome::Queued(entry))
    }

    /// Rows of `table` matching `filter`: remote when reachable, else the
    /// cached collection, else nothing.
    pub async fn read(&self, table: Table, filter: &Filter) -> Vec<Record> {
        with_fallback(
            &self.network,
            || self.remote.select(table, filter),
            || async { self.store.get_collection(table).await.map(|rows| filter.apply(rows)) },
            Vec::new(),
        )
        .await
    }

    pub async fn pending_count(&self) -> AppResult<usize> {
        let queued = self.store.queued().await?;
        Ok(queued.iter().filter(|entry| !entry.synced).count())
    }

    /// Places an order through the remote procedure. Orders need the server
    /// to allocate ids and totals, so this is online-only.
    pub async fn create_order(&self, order: &OrderDraft) -> AppResult<String> {
        if !self.network.is_online() {
            return Err(AppError::Offline("create an order"));
        }
        if order.items.is_empty() {
            return Err(AppError::Validation("An order needs at least one item".to_string()));
        }
        let order_id = self.remote.create_order_with_items(order).await?;
        info!("Order {order_id} created with {} items", order.items.len());
        Ok(order_id)
    }
}

/// Fetches performed by every Sync-Down run, in order.
///
/// Budgets cover the calendar month of `today`; tasks cover due dates in
/// `[today - 1 month, today + 1 month)`.
pub fn sync_down_plan(rep_id: &str, today: NaiveDate) -> Vec<(Table, Filter)> {
    let window_start = today.checked_sub_months(Months::new(1)).unwrap_or(today);
    let window_end = today.checked_add_months(Months::new(1)).unwrap_or(today);

    vec![
        (Table::Clients, Filter::all()),
        (Table::Products, Filter::all()),
        (Table::ClientProducts, Filter::all()),
        (
            Table::Budgets,
            Filter::all()
                .eq("rep_id", rep_id)
                .eq("year", today.year())
                .eq("month", today.month()),
        ),
        (
            Table::RepTasks,
            Filter::all()
                .eq("rep_id", rep_id)
                .gte("due_date", window_start.to_string())
                .lt("due_date", window_end.to_string()),
        ),
        (Table::ClientFollowUp, Filter::all()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_fetches_six_tables_in_order() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let tables: Vec<Table> = sync_down_plan("r1", today).into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            tables,
            vec![
                Table::Clients,
                Table::Products,
                Table::ClientProducts,
                Table::Budgets,
                Table::RepTasks,
                Table::ClientFollowUp,
            ]
        );
    }

    #[test]
    fn task_window_spans_one_month_each_side() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 31).unwrap();
        let plan = sync_down_plan("r1", today);
        let (_, tasks) = plan.iter().find(|(t, _)| *t == Table::RepTasks).unwrap();
        assert_eq!(
            tasks.to_query_pairs(),
            vec![
                ("rep_id".to_string(), "eq.r1".to_string()),
                ("due_date".to_string(), "gte.2026-02-28".to_string()),
                ("due_date".to_string(), "lt.2026-04-30".to_string()),
            ]
        );
    }

    #[test]
    fn budgets_are_scoped_to_current_month() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let plan = sync_down_plan("r1", today);
        let (_, budgets) = plan.iter().find(|(t, _)| *t == Table::Budgets).unwrap();
        assert!(budgets.matches(&serde_json::json!({"rep_id": "r1", "year": 2026, "month": 10})));
        assert!(!budgets.matches(&serde_json::json!({"rep_id": "r1", "year": 2026, "month": 9})));
    }
}
