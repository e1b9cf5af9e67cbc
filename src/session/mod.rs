//! Session bindings between agent identities and ships.

pub mod models;
pub mod repository;

pub use repository::SessionRepository;
