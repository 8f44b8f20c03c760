//! PostgreSQL implementations for production document storage

mod document_store;

pub use document_store::*;
