//! # Field Sync Core
//!
//! Offline-first data layer for a field-sales rep app. A rep keeps working
//! with no network: writes are buffered in a durable mutation queue, reads
//! degrade to a cached snapshot of the remote store, and both are reconciled
//! once connectivity returns.
//!
//! ## Components
//!
//! - [`LocalDbState`]: LMDB store holding cached collections, the mutation
//!   queue and the active-visit marker
//! - [`NetworkMonitor`]: last-known connectivity plus reconnect auto-sync
//! - [`SyncEngine`]: Sync-Up (drain queue), Sync-Down (refresh cache),
//!   online/offline writes, fallback reads and the visit flow
//! - [`with_fallback`]: the never-failing remote-then-local read wrapper
//! - [`RemoteStore`] / [`RestRemote`]: the remote boundary
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use field_sync_core::{LocalDbState, NetworkMonitor, RestRemote, SyncConfig, SyncEngine};
//!
//! # async fn run() -> Result<(), field_sync_core::AppError> {
//! let config = SyncConfig::from_env()?;
//! let store = Arc::new(LocalDbState::open(&config)?);
//! let remote = Arc::new(RestRemote::new(&config)?);
//! let network = NetworkMonitor::new(true);
//!
//! let engine = Arc::new(SyncEngine::new(remote, store, network.clone()));
//! let _auto_sync = network.start_auto_sync(engine.clone(), "rep-1");
//!
//! engine.sync_all("rep-1").await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## FFI Functions
//!
//! Mobile hosts that drive the UI in another language reach the local store
//! through C-compatible functions returning JSON [`AppResponse`] envelopes:
//!
//! - [`create_db`] - Open the local store
//! - [`get_collection`] / [`set_collection`] - Cached collection access
//! - [`enqueue_mutation`] / [`pending_mutations`] - Mutation queue access
//! - [`get_active_visit`] - Current visit marker
//! - [`clear_all_records`] - Wipe local data (e.g. on logout)
//! - [`close_database`] - Flush and release the store
//! - [`free_c_string`] - Release a string returned by any of the above

pub mod app_response;
pub mod config;
pub mod error;
pub mod fallback;
pub mod filter;
pub mod local_db_model;
pub mod local_db_state;
pub mod mutation;
pub mod network;
pub mod remote;
pub mod sync;
mod visit;

pub use crate::app_response::AppResponse;
pub use crate::config::SyncConfig;
pub use crate::error::{AppError, AppResult};
pub use crate::fallback::with_fallback;
pub use crate::filter::{Filter, FilterOp};
pub use crate::local_db_model::{ActiveVisit, Record, Table};
pub use crate::local_db_state::{LocalDbState, LocalStore};
pub use crate::mutation::{Mutation, PendingWrite, QueuedMutation};
pub use crate::network::{AutoSyncHandle, Connectivity, NetworkMonitor};
pub use crate::remote::{OrderDraft, OrderItemDraft, RemoteError, RemoteStore, RestRemote};
pub use crate::sync::{SyncDownReport, SyncEngine, SyncSummary, WriteOutcome};

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use log::{info, warn};
use serde::Serialize;

/// Opens (or creates) the local store at `<name>.lmdb`.
///
/// # Returns
///
/// A pointer to the [`LocalDbState`], or null if `name` is null, not UTF-8,
/// or the environment cannot be opened. Release it with [`close_database`].
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use field_sync_core::create_db;
///
/// let name = CString::new("field_sync").unwrap();
/// let db_state = create_db(name.as_ptr());
/// assert!(!db_state.is_null());
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn create_db(name: *const c_char) -> *mut LocalDbState {
    if name.is_null() {
        warn!("Null name pointer passed to create_db");
        return std::ptr::null_mut();
    }

    let name_str = match unsafe { CStr::from_ptr(name).to_str() } {
        Ok(s) => s,
        Err(e) => {
            warn!("Invalid UTF-8 in name parameter: {e}");
            return std::ptr::null_mut();
        }
    };

    match LocalDbState::init(name_str) {
        Ok(state) => {
            info!("Local store ready at {}", state.path().display());
            Box::into_raw(Box::new(state))
        }
        Err(e) => {
            warn!("Failed to open local store '{name_str}': {e}");
            std::ptr::null_mut()
        }
    }
}

/// Returns the cached collection named by `table` as a JSON array.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `table` - Null-terminated C string with the table's wire name, e.g. `"clients"`
///
/// # Returns
///
/// An `Ok` envelope holding the JSON array. A table never synced yields `[]`.
/// An unknown table name yields a `ValidationError`. The returned string must
/// be freed with [`free_c_string`].
///
/// # Safety
///
/// `state` must be null or a live pointer from [`create_db`].
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_collection(state: *mut LocalDbState, table: *const c_char) -> *const c_char {
    let state = match state_ref(state, "get_collection") {
        Ok(state) => state,
        Err(err) => return err,
    };
    let table = match c_ptr_to_table(table) {
        Ok(table) => table,
        Err(err) => return err,
    };

    respond_json(state.get_collection(table))
}

/// Overwrites the collection named by `table` with the JSON array in `json_ptr`.
///
/// The previous contents are replaced in a single transaction; readers never
/// see a mix of old and new rows.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `table` - Null-terminated C string with the table's wire name
/// * `json_ptr` - Null-terminated C string holding a JSON array of records
///
/// # Returns
///
/// An `Ok` envelope with a confirmation message, a `SerializationError` when
/// `json_ptr` is not a JSON array, `ValidationError` for an unknown table, or
/// `BadRequest` for null or non-UTF-8 input. The returned string must be
/// freed with [`free_c_string`].
///
/// # Safety
///
/// `state` must be null or a live pointer from [`create_db`]. Both strings
/// must be null or valid null-terminated C strings.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use field_sync_core::{create_db, free_c_string, set_collection};
///
/// let name = CString::new("field_sync").unwrap();
/// let db_state = create_db(name.as_ptr());
/// let table = CString::new("clients").unwrap();
/// let rows = CString::new(r#"[{"id":"c1","name":"Acme"}]"#).unwrap();
/// let result = set_collection(db_state, table.as_ptr(), rows.as_ptr());
/// free_c_string(result);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn set_collection(state: *mut LocalDbState, table: *const c_char, json_ptr: *const c_char) -> *const c_char {
    let state = match state_ref(state, "set_collection") {
        Ok(state) => state,
        Err(err) => return err,
    };
    let table = match c_ptr_to_table(table) {
        Ok(table) => table,
        Err(err) => return err,
    };
    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let records: Vec<Record> = match serde_json::from_str(&json_str) {
        Ok(records) => records,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Expected a JSON array of records: {e}"));
            return response_to_c_string(&error);
        }
    };

    match state.set_collection(table, &records) {
        Ok(()) => response_to_c_string(&AppResponse::success(format!("{} records stored in '{table}'", records.len()))),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Appends a write to the mutation queue.
///
/// # JSON Format
///
/// ```json
/// {
///   "table": "clients",
///   "mutation": { "op": "update", "key": "c1", "patch": { "name": "Acme" } }
/// }
/// ```
///
/// `idempotency_key` may be supplied; a fresh one is generated otherwise.
/// `update` and `delete` must carry a `key`.
///
/// # Parameters
///
/// * `state` - Pointer returned by [`create_db`]
/// * `json_ptr` - Null-terminated C string holding the write, as above
///
/// # Returns
///
/// An `Ok` envelope holding the stored [`QueuedMutation`], including its
/// assigned id and position. Malformed writes (unknown table, missing key,
/// unknown `op`) yield a `SerializationError` and nothing is queued. The
/// returned string must be freed with [`free_c_string`].
///
/// # Safety
///
/// `state` must be null or a live pointer from [`create_db`]; `json_ptr`
/// must be null or a valid null-terminated C string.
///
/// # Examples
///
/// ```no_run
/// use std::ffi::CString;
/// use field_sync_core::{create_db, enqueue_mutation, free_c_string};
///
/// let name = CString::new("field_sync").unwrap();
/// let db_state = create_db(name.as_ptr());
/// let write = CString::new(
///     r#"{"table":"visits","mutation":{"op":"insert","row":{"id":"v1","client_id":"c1"}}}"#,
/// )
/// .unwrap();
/// let result = enqueue_mutation(db_state, write.as_ptr());
/// free_c_string(result);
/// ```
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn enqueue_mutation(state: *mut LocalDbState, json_ptr: *const c_char) -> *const c_char {
    let state = match state_ref(state, "enqueue_mutation") {
        Ok(state) => state,
        Err(err) => return err,
    };
    let json_str = match c_ptr_to_string(json_ptr, "JSON") {
        Ok(json) => json,
        Err(err) => return err,
    };

    let write: PendingWrite = match serde_json::from_str(&json_str) {
        Ok(write) => write,
        Err(e) => {
            let error = AppResponse::SerializationError(format!("Invalid mutation: {e}"));
            return response_to_c_string(&error);
        }
    };

    respond_json(state.enqueue(write))
}

/// Returns every queued mutation, oldest first.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn pending_mutations(state: *mut LocalDbState) -> *const c_char {
    match state_ref(state, "pending_mutations") {
        Ok(state) => respond_json(state.queued()),
        Err(err) => err,
    }
}

/// Returns the active visit, or `NotFound` when no visit is in progress.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn get_active_visit(state: *mut LocalDbState) -> *const c_char {
    let state = match state_ref(state, "get_active_visit") {
        Ok(state) => state,
        Err(err) => return err,
    };

    match state.get_active_visit() {
        Ok(Some(visit)) => respond_json::<ActiveVisit>(Ok(visit)),
        Ok(None) => response_to_c_string(&AppResponse::NotFound("No active visit".to_string())),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Removes every cached collection, queued mutation and the visit marker.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn clear_all_records(state: *mut LocalDbState) -> *const c_char {
    let state = match state_ref(state, "clear_all_records") {
        Ok(state) => state,
        Err(err) => return err,
    };

    match state.clear_all_records() {
        Ok(()) => response_to_c_string(&AppResponse::success("All records cleared successfully")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Flushes and releases a store returned by [`create_db`].
///
/// The pointer must not be used after this call.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn close_database(state: *mut LocalDbState) -> *const c_char {
    if state.is_null() {
        let error = AppResponse::BadRequest("Null state pointer passed to close_database".to_string());
        return response_to_c_string(&error);
    }

    let state = unsafe { Box::from_raw(state) };
    let flushed = state.flush();
    drop(state);

    match flushed {
        Ok(()) => response_to_c_string(&AppResponse::success("Database connection closed successfully")),
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Releases a string returned by any function in this module.
#[no_mangle]
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub extern "C" fn free_c_string(ptr: *const c_char) {
    if ptr.is_null() {
        return;
    }
    unsafe {
        drop(CString::from_raw(ptr as *mut c_char));
    }
}

fn state_ref<'a>(state: *mut LocalDbState, caller: &str) -> Result<&'a LocalDbState, *const c_char> {
    match unsafe { state.as_ref() } {
        Some(state) => Ok(state),
        None => {
            let error = AppResponse::BadRequest(format!("Null state pointer passed to {caller}"));
            Err(response_to_c_string(&error))
        }
    }
}

fn c_ptr_to_table(ptr: *const c_char) -> Result<Table, *const c_char> {
    let name = c_ptr_to_string(ptr, "table")?;
    name.parse::<Table>()
        .map_err(|e| response_to_c_string(&AppResponse::from(e)))
}

/// Serializes a successful value into an `Ok` envelope.
fn respond_json<T: Serialize>(result: AppResult<T>) -> *const c_char {
    match result {
        Ok(value) => match serde_json::to_string(&value) {
            Ok(json) => response_to_c_string(&AppResponse::Ok(json)),
            Err(e) => response_to_c_string(&AppResponse::from(e)),
        },
        Err(e) => response_to_c_string(&AppResponse::from(e)),
    }
}

/// Converts an [`AppResponse`] to a C string owned by the caller.
///
/// Returns null if serialization or C string creation fails.
fn response_to_c_string(response: &AppResponse) -> *const c_char {
    let json = match serde_json::to_string(response) {
        Ok(j) => j,
        Err(e) => {
            warn!("Error serializing response: {e}");
            return std::ptr::null();
        }
    };

    match CString::new(json) {
        Ok(c_str) => c_str.into_raw(),
        Err(e) => {
            warn!("Error creating CString: {e}");
            std::ptr::null()
        }
    }
}

/// Converts a C string pointer to a Rust String, reporting null pointers
/// and invalid UTF-8 as `BadRequest` envelopes.
fn c_ptr_to_string(ptr: *const c_char, field_name: &str) -> Result<String, *const c_char> {
    if ptr.is_null() {
        let error = AppResponse::BadRequest(format!("Null {field_name} pointer"));
        return Err(response_to_c_string(&error));
    }

    match unsafe { CStr::from_ptr(ptr).to_str() } {
        Ok(s) => Ok(s.to_string()),
        Err(e) => {
            let error = AppResponse::BadRequest(format!("Invalid UTF-8 in {field_name}: {e}"));
            Err(response_to_c_string(&error))
        }
    }
}
