//! Business logic services for the inventory ledger core

pub mod fefo;
pub mod inventory;

pub use inventory::InventoryService;
