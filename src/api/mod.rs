//! Purpose: Define the stable public Rust API boundary for stocktake.
//! Exports: Core inventory types, store backends, and store configuration.
//! Role: Public, additive-only surface used by the CLI, the server, and tests.
//! Invariants: Network backends are only reachable through this module.

mod config;
mod firestore;
mod remote;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::controller::Inventory;
pub use crate::core::csv::{CSV_HEADER, export_csv};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::file_store::FileStore;
pub use crate::core::item::{DEFAULT_QUANTITY, Item, QuantityPolicy};
pub use crate::core::model::{
    Action, Failure, FailureKind, Notification, NotificationLevel, Operation, Status, Theme,
    ViewModel, update,
};
pub use crate::core::store::{Applied, Change, ItemStore, MemoryStore, StoreResult};
pub use crate::core::view::{
    DEFAULT_PAGE_SIZE, NameCollator, Projection, SortDirection, SortField, SortSpec, filter_and_sort, project,
};
pub use config::{
    ENV_STORE, ENV_TIMEOUT_MS, ENV_TOKEN, StoreConfig, StoreRef, default_store_path,
};
pub use firestore::{FirestoreConfig, FirestoreStore};
pub use remote::RemoteStore;
