//! Compras inventory core — the authoritative stock ledger and movement
//! engine of the Compras purchasing platform.
//!
//! Tracks exact quantities per `(product, location, lot, expiry)`, consumes
//! stock under first-expire-first-out ordering, and journals every quantity
//! delta in an append-only movement log. HTTP controllers, authentication
//! and notification delivery live in external collaborators; this crate owns
//! the correctness of quantities under concurrent writers.

pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::InventoryService;
