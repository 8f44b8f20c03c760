//! SQLite implementations for local and test document storage

mod document_store;

pub use document_store::*;
