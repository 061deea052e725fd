//! Pending writes held in the durable mutation queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::local_db_model::{Record, Table};

/// One write intended for the remote store.
///
/// `Update` and `Delete` address an existing row and therefore always carry
/// its key; `Insert` and `Upsert` identify the row through the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    Insert { row: Record },
    Update { key: String, patch: Record },
    Upsert { row: Record },
    Delete { key: String },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::Insert { .. } => "insert",
            Mutation::Update { .. } => "update",
            Mutation::Upsert { .. } => "upsert",
            Mutation::Delete { .. } => "delete",
        }
    }

    /// Key of the targeted row: explicit for update/delete, the payload's
    /// `id` field for insert/upsert when it has one.
    pub fn target_key(&self) -> Option<&str> {
        match self {
            Mutation::Update { key, .. } | Mutation::Delete { key } => Some(key.as_str()),
            Mutation::Insert { row } | Mutation::Upsert { row } => row.get("id").and_then(|v| v.as_str()),
        }
    }
}

/// A write not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    /// Assigned at enqueue time, independent of the target row's key.
    pub id: Uuid,
    /// Queue position. Strictly increasing in enqueue order.
    pub seq: u64,
    pub table: Table,
    pub mutation: Mutation,
    /// Survives re-queueing so the remote can recognise a replayed write.
    pub idempotency_key: Uuid,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub synced: bool,
}

/// What a caller hands to the queue; the store fills in the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub table: Table,
    pub mutation: Mutation,
    #[serde(default = "Uuid::new_v4")]
    pub idempotency_key: Uuid,
}

impl PendingWrite {
    pub fn new(table: Table, mutation: Mutation) -> Self {
        Self {
            table,
            mutation,
            idempotency_key: Uuid::new_v4(),
        }
    }
}

impl From<&QueuedMutation> for PendingWrite {
    fn from(entry: &QueuedMutation) -> Self {
        Self {
            table: entry.table,
            mutation: entry.mutation.clone(),
            idempotency_key: entry.idempotency_key,
        }
    }
}
