#![deny(unsafe_code)]

//! Content-addressed store adapter and the typed storage facade built on it.

pub mod content_store;
pub mod error;
pub mod facade;

pub use content_store::{ContentStore, HttpContentStore, InMemoryContentStore};
pub use error::StoreError;
pub use facade::StorageFacade;
