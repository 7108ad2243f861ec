// Promotion pipeline library shared by the scheduler binary and its tests

pub mod clock;
pub mod config;
pub mod copy;
pub mod db;
pub mod dedup;
pub mod errors;
pub mod filter;
pub mod finder;
pub mod lock;
pub mod marketplace;
pub mod message;
pub mod models;
pub mod publisher;
pub mod scheduler;
pub mod store;
pub mod telemetry;
