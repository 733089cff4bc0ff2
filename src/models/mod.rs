//! Data model for the stock ledger and movement log

pub mod inventory;

pub use inventory::{
    max_expiry_date, AdjustmentInput, AdjustmentMode, EntryInput, ExitSaleInput, LotKey, Movement,
    MovementReason, OperationReceipt, ReclassifyTarget, ReferenceType, ReturnOutputInput,
    StockRecord, TransferInput, NO_LOT_CODE,
};
