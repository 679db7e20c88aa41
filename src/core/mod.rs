// Core modules: records, stores, projection, view model, and the controller.
pub mod controller;
pub mod csv;
pub mod error;
pub mod file_store;
pub mod item;
pub mod model;
pub mod store;
pub mod view;
