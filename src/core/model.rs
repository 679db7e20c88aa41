//! Purpose: Explicit inventory view model and its pure update function.
//! Exports: `ViewModel`, `Action`, `Operation`, `Status`, `Theme`, `Failure`, `FailureKind`,
//! `Notification`, `update`.
//! Role: Single place where UI state transitions happen; the controller issues the
//! store side effect first, then commits the outcome through `update`.
//! Invariants: `update` is pure: `(state, action) -> state`, no I/O.
//! Invariants: A failure never touches `items`; the mirror stays stale-but-present.
//! Invariants: `Refreshed` replaces the mirror wholesale; it is never patched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::item::Item;
use crate::core::view::{
    DEFAULT_PAGE_SIZE, NameCollator, Projection, SortField, SortSpec, project,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Fetch,
    Add,
    Remove,
    Edit,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Fetch => "fetch",
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::Edit => "edit",
            Operation::Delete => "delete",
        }
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Operation::Fetch => "Inventory refreshed",
            Operation::Add => "Item added successfully",
            Operation::Remove => "Item removed successfully",
            Operation::Edit => "Item updated successfully",
            Operation::Delete => "Item deleted successfully",
        }
    }

    pub fn failure_message(self) -> &'static str {
        match self {
            Operation::Fetch => "Failed to fetch inventory",
            Operation::Add => "Failed to add item",
            Operation::Remove => "Failed to remove item",
            Operation::Edit => "Failed to update item",
            Operation::Delete => "Failed to delete item",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchFailed,
    MutationFailed,
    /// Only raised under `QuantityPolicy::Strict`.
    ParseFailed,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub operation: Operation,
    pub message: String,
    pub error_kind: ErrorKind,
    pub cause: Option<String>,
}

impl Failure {
    pub fn from_error(kind: FailureKind, operation: Operation, err: &Error) -> Self {
        let message = match kind {
            FailureKind::FetchFailed => Operation::Fetch.failure_message(),
            _ => operation.failure_message(),
        };
        Self {
            kind,
            operation,
            message: message.to_string(),
            error_kind: err.kind(),
            cause: Some(err.to_string()),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, ": {cause}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Failure {}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Failure,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub operation: Operation,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Dark => Theme::Light,
            Theme::Light => Theme::Dark,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "operation", rename_all = "snake_case")]
pub enum Status {
    #[default]
    Idle,
    InFlight(Operation),
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ViewModel {
    pub items: Vec<Item>,
    pub search: String,
    pub sort: SortSpec,
    pub page: usize,
    pub page_size: usize,
    pub theme: Theme,
    pub status: Status,
    pub error: Option<Failure>,
    pub notification: Option<Notification>,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            search: String::new(),
            sort: SortSpec::default(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            theme: Theme::default(),
            status: Status::Idle,
            error: None,
            notification: None,
        }
    }
}

impl ViewModel {
    pub fn is_loading(&self) -> bool {
        matches!(self.status, Status::InFlight(_))
    }

    pub fn projection(&self, collator: &NameCollator) -> Projection {
        project(
            &self.items,
            &self.search,
            self.sort,
            self.page,
            self.page_size,
            collator,
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Action {
    Started(Operation),
    Refreshed(Vec<Item>),
    /// Refresh after a mutation failed; the mutation itself already landed.
    RefreshFailed(Failure),
    Succeeded(Operation),
    Failed(Failure),
    SetSearch(String),
    ToggleSort(SortField),
    SetSort(SortSpec),
    SetPage(usize),
    SetPageSize(usize),
    ToggleTheme,
    DismissNotification,
}

pub fn update(mut state: ViewModel, action: Action) -> ViewModel {
    match action {
        Action::Started(operation) => {
            state.status = Status::InFlight(operation);
            state.error = None;
        }
        Action::Refreshed(items) => {
            state.items = items;
        }
        Action::RefreshFailed(failure) => {
            state.error = Some(failure);
        }
        Action::Succeeded(operation) => {
            state.status = Status::Idle;
            if operation != Operation::Fetch {
                state.notification = Some(Notification {
                    level: NotificationLevel::Success,
                    operation,
                    message: operation.success_message().to_string(),
                });
            }
        }
        Action::Failed(failure) => {
            state.status = Status::Idle;
            state.notification = Some(Notification {
                level: NotificationLevel::Failure,
                operation: failure.operation,
                message: failure.message.clone(),
            });
            state.error = Some(failure);
        }
        Action::SetSearch(search) => {
            state.search = search;
        }
        Action::ToggleSort(field) => {
            state.sort = state.sort.toggle(field);
        }
        Action::SetSort(sort) => {
            state.sort = sort;
        }
        Action::SetPage(page) => {
            state.page = page;
        }
        Action::SetPageSize(page_size) => {
            state.page_size = page_size;
        }
        Action::ToggleTheme => {
            state.theme = state.theme.toggled();
        }
        Action::DismissNotification => {
            state.notification = None;
        }
    }
    state
}
