//! # Bibstack
//!
//! The persistence and identity layer of a document-library service: each
//! library is a named, owned collection of document codes, shared among
//! users through a permission matrix and reconciled periodically against an
//! external identity directory.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! bibstack = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use bibstack::store::{SqliteStore, Store};
//! use bibstack::types::Library;
//!
//! let store = SqliteStore::new("./data/bibstack.db").unwrap();
//! store.initialize().unwrap();
//!
//! let owner = store.create_user(42).unwrap();
//! let library = Library::new("reading list", None, false);
//! store.create_library(owner.id, &library).unwrap();
//! store.append_document(&library.id, "2019A&A...622A.195B").unwrap();
//! // Hand out library.id.token() as the public reference.
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the admin binary. Disable with
//!   `default-features = false`.

pub mod config;
pub mod error;
pub mod store;
pub mod sync;
pub mod types;
