//! Append-only execution history, the raw material for a skill library.

pub mod models;
pub mod repository;

pub use repository::HistoryRepository;
