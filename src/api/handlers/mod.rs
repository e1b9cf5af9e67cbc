pub mod sessions;
pub mod ships;
pub mod stat;
