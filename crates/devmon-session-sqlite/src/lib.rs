//! SQLite session storage for DevMon
//!
//! This crate implements the `SessionStore` trait on a single SQLite file
//! holding the `device_sessions` table.
//!
//! # Example
//! ```no_run
//! # use devmon_session_sqlite::SqliteSessionStore;
//! # use devmon_core::SessionStore;
//! # async fn example() -> devmon_core::Result<()> {
//! let store = SqliteSessionStore::new("data/sessions.db").await?;
//! let session = store.create("dev-1", chrono::Utc::now(), None).await?;
//! # Ok(())
//! # }
//! ```

pub mod sqlite_session_store;

pub use sqlite_session_store::{DEFAULT_PAGE_SIZE, SqliteSessionStore};
