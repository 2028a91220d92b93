//! Device telemetry ingestion and query backend.
//!
//! Sensors post readings to `POST /api/telemetry`; each reading is validated,
//! normalized and stored once. `GET /api/telemetry/last` reads back the most
//! recent records. Both paths refuse work until the storage lifecycle reports
//! the store as ready.

pub mod clock;
pub mod config;
pub mod db;
pub mod errors;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod model;
pub mod normalize;
pub mod rest;
pub mod service;
pub mod store;
pub mod validate;
