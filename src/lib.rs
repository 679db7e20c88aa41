//! Purpose: Shared library crate behind the `stocktake` CLI, server, and tests.
//! Exports: `core` (records, stores, projection, view model, controller), `api`, `notice`.
//! Role: Library backing the binary; `api` is the intended consumer surface.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
//! Invariants: Store backends are interchangeable behind `core::store::ItemStore`.
pub mod api;
pub mod core;
pub mod notice;
