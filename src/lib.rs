//! Bay: the Shipyard control plane.
//!
//! Allocates isolated sandbox containers ("ships") to agent sessions,
//! keeps a warm pool to hide cold starts, enforces TTLs, drives Docker,
//! Podman, or Kubernetes behind one driver interface, and proxies exec,
//! file, and terminal traffic into the ships.

pub mod api;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod history;
pub mod session;
pub mod ship;
