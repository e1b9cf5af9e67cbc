//! Ship management: models, persistence, the allocation service, the ship
//! HTTP client, and the background loops.

pub mod client;
pub mod models;
pub mod reaper;
pub mod repository;
pub mod service;
pub mod warm_pool;

pub use client::ShipClient;
pub use repository::ShipRepository;
pub use service::ShipService;
