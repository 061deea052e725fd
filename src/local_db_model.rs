//! Data model definitions for the local cache.
//!
//! Cached rows are kept as raw JSON objects exactly as the remote store
//! returned them; only the table set and the active-visit marker are typed.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::AppError;

/// A cached row. Always a JSON object; most rows carry an `id` field.
pub type Record = JsonValue;

/// Every remote table or view the core reads from or writes to. Unknown
/// names are rejected when parsed, before anything reaches the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Clients,
    Products,
    Visits,
    Orders,
    OrderItems,
    ClientProducts,
    RepTasks,
    Budgets,
    ClientFollowUp,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Table::Clients,
        Table::Products,
        Table::Visits,
        Table::Orders,
        Table::OrderItems,
        Table::ClientProducts,
        Table::RepTasks,
        Table::Budgets,
        Table::ClientFollowUp,
    ];

    /// Name used both as the remote table name and as the local collection key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Clients => "clients",
            Table::Products => "products",
            Table::Visits => "visits",
            Table::Orders => "orders",
            Table::OrderItems => "order_items",
            Table::ClientProducts => "client_products",
            Table::RepTasks => "rep_tasks",
            Table::Budgets => "budgets",
            Table::ClientFollowUp => "client_follow_up",
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .iter()
            .copied()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown table: {s}")))
    }
}

/// The visit the rep is currently conducting.
///
/// At most one exists per device. It is deleted, never blanked, when the
/// visit ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveVisit {
    pub visit_id: String,
    pub client_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_parse_back() {
        for table in Table::ALL {
            assert_eq!(table.as_str().parse::<Table>().unwrap(), table);
        }
    }

    #[test]
    fn unknown_table_is_rejected() {
        let err = "invoices".parse::<Table>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn table_serializes_as_wire_name() {
        let json = serde_json::to_string(&Table::ClientFollowUp).unwrap();
        assert_eq!(json, "\"client_follow_up\"");
    }
}
