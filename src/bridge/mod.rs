//! Bridge configuration: data model, in-memory store, and the admin API.

pub mod api;
pub mod models;
pub mod store;

pub use store::ConfigStore;
