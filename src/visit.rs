//! Client visit lifecycle on top of the sync engine.

use chrono::Utc;
use log::info;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::local_db_model::{ActiveVisit, Table};
use crate::mutation::Mutation;
use crate::sync::SyncEngine;

impl SyncEngine {
    /// Starts a visit at `client_id`.
    ///
    /// Fails with [`AppError::ActiveVisitExists`] before touching the remote
    /// or the queue if another visit is still open.
    pub async fn start_visit(&self, rep_id: &str, client_id: &str, notes: Option<String>) -> AppResult<ActiveVisit> {
        if let Some(current) = self.store().get_active_visit().await? {
            return Err(AppError::ActiveVisitExists {
                visit_id: current.visit_id,
            });
        }

        let visit = ActiveVisit {
            visit_id: Uuid::new_v4().to_string(),
            client_id: client_id.to_string(),
            started_at: Utc::now(),
            notes,
        };
        let row = json!({
            "id": visit.visit_id,
            "rep_id": rep_id,
            "client_id": visit.client_id,
            "started_at": visit.started_at,
            "notes": visit.notes,
            "status": "in_progress",
        });

        self.write(Table::Visits, Mutation::Insert { row }).await?;
        self.store().set_active_visit(Some(&visit)).await?;
        info!("Visit {} started at client {}", visit.visit_id, visit.client_id);
        Ok(visit)
    }

    /// Closes the active visit, returning it. Notes given here replace the
    /// ones recorded at start.
    pub async fn end_visit(&self, notes: Option<String>) -> AppResult<ActiveVisit> {
        let mut visit = self.store().get_active_visit().await?.ok_or(AppError::NoActiveVisit)?;
        if notes.is_some() {
            visit.notes = notes;
        }

        let patch = json!({
            "ended_at": Utc::now(),
            "notes": visit.notes,
            "status": "completed",
        });
        self.write(
            Table::Visits,
            Mutation::Update {
                key: visit.visit_id.clone(),
                patch,
            },
        )
        .await?;

        self.store().set_active_visit(None).await?;
        info!("Visit {} ended", visit.visit_id);
        Ok(visit)
    }
}
