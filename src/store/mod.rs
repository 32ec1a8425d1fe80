//! Durable job + dependency + log storage.
//!
//! Single embedded SQLite database in WAL mode. All multi-row writes run in
//! one transaction; the connection mutex makes the store the single writer.

mod claim;
mod db;
mod jobs;
mod logs;

pub use db::Store;

#[cfg(test)]
pub(crate) use jobs::test_support::input as test_input;
