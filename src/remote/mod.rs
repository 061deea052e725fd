//! Boundary to the remote relational store.
//!
//! The remote is the source of truth. The core only needs row selects, the
//! four row writes and the order RPC, all behind [`RemoteStore`].

mod rest;

pub use rest::RestRemote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::filter::Filter;
use crate::local_db_model::{Record, Table};
use crate::mutation::Mutation;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(String),

    /// Uniqueness/primary-key conflict.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Validation, permission or any other rejection.
    #[error("rejected ({status}): {message}")]
    Rejected {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("could not decode response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, RemoteError::Duplicate(_))
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// One line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemDraft {
    pub product_id: String,
    pub quantity: u32,
    pub unit_price: f64,
}

/// Parameters of the order-with-items procedure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDraft {
    pub client_id: String,
    pub rep_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub items: Vec<OrderItemDraft>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, table: Table, filter: &Filter) -> RemoteResult<Vec<Record>>;

    async fn insert(&self, table: Table, row: &Record) -> RemoteResult<()>;

    /// Partial patch of the row whose `id` is `key`.
    async fn update(&self, table: Table, patch: &Record, key: &str) -> RemoteResult<()>;

    /// Create-or-replace on the table's natural key.
    async fn upsert(&self, table: Table, row: &Record) -> RemoteResult<()>;

    async fn delete(&self, table: Table, key: &str) -> RemoteResult<()>;

    /// Creates the order and its lines atomically, returning the order id.
    async fn create_order_with_items(&self, order: &OrderDraft) -> RemoteResult<String>;

    /// Executes one queued write.
    ///
    /// The default drops the idempotency key; transports that can forward it
    /// to the server override this.
    async fn apply(&self, table: Table, mutation: &Mutation, _idempotency_key: Uuid) -> RemoteResult<()> {
        match mutation {
            Mutation::Insert { row } => self.insert(table, row).await,
            Mutation::Update { key, patch } => self.update(table, patch, key).await,
            Mutation::Upsert { row } => self.upsert(table, row).await,
            Mutation::Delete { key } => self.delete(table, key).await,
        }
    }
}
