//! Ledger rows, movement records and operation payloads.
//!
//! The ledger composite key `(product, location, lot, expiry)` is always
//! fully defined in storage: stock without lot tracking is keyed by the
//! sentinel pair so the uniqueness constraint applies uniformly. The public
//! API models lots as `Option` values and [`LotKey`] owns the translation.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Sentinel lot code stored when the caller does not track lots.
pub const NO_LOT_CODE: &str = "__NULL__";

/// Sentinel expiry stored when the caller does not track lots. Sorts after
/// every real date, so untracked stock drains last under FEFO.
pub fn max_expiry_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 31).expect("sentinel date is valid")
}

/// Normalized `(lot_code, expiry_date)` half of the ledger composite key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotKey {
    lot_code: String,
    expiry_date: NaiveDate,
}

impl LotKey {
    /// Key for stock without lot tracking.
    pub fn untracked() -> Self {
        Self {
            lot_code: NO_LOT_CODE.to_string(),
            expiry_date: max_expiry_date(),
        }
    }

    /// Normalize caller-supplied lot information into a storage key.
    ///
    /// Lot codes are trimmed and uppercased; a blank code counts as absent.
    /// Lot code and expiry must be supplied together or not at all, and an
    /// expiry on or after the sentinel date is rejected.
    pub fn normalize(lot_code: Option<&str>, expiry_date: Option<NaiveDate>) -> AppResult<Self> {
        let code = lot_code
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());

        if code.is_some() != expiry_date.is_some() {
            return Err(AppError::InconsistentLotInfo);
        }
        if let Some(expiry) = expiry_date {
            if expiry >= max_expiry_date() {
                return Err(AppError::InvalidDate(format!(
                    "{expiry} is reserved for untracked lots"
                )));
            }
        }

        match (code, expiry_date) {
            (Some(lot_code), Some(expiry_date)) => Ok(Self {
                lot_code,
                expiry_date,
            }),
            _ => Ok(Self::untracked()),
        }
    }

    /// Rebuild a key from values already stored in the ledger.
    pub(crate) fn from_storage(lot_code: String, expiry_date: NaiveDate) -> Self {
        Self {
            lot_code,
            expiry_date,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.lot_code != NO_LOT_CODE
    }

    /// Storage value of the lot code column.
    pub fn lot_code(&self) -> &str {
        &self.lot_code
    }

    /// Storage value of the expiry column.
    pub fn expiry_date(&self) -> NaiveDate {
        self.expiry_date
    }

    /// Caller-facing lot code, `None` for the sentinel.
    pub fn lot_code_opt(&self) -> Option<&str> {
        (self.lot_code != NO_LOT_CODE).then_some(self.lot_code.as_str())
    }

    /// Caller-facing expiry, `None` for the sentinel.
    pub fn expiry_date_opt(&self) -> Option<NaiveDate> {
        (self.expiry_date != max_expiry_date()).then_some(self.expiry_date)
    }
}

/// One authoritative ledger row. Deleted when drained to zero; no
/// zero-quantity rows persist.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct StockRecord {
    pub id: i64,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_code: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub updated_by: Option<Uuid>,
}

impl StockRecord {
    /// Caller-facing lot code, `None` for the sentinel.
    pub fn lot_code_opt(&self) -> Option<&str> {
        (self.lot_code != NO_LOT_CODE).then_some(self.lot_code.as_str())
    }

    /// Caller-facing expiry, `None` for the sentinel.
    pub fn expiry_date_opt(&self) -> Option<NaiveDate> {
        (self.expiry_date != max_expiry_date()).then_some(self.expiry_date)
    }
}

/// Business reason of a quantity delta
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementReason {
    PurchaseEntry,
    ExitSale,
    Transfer,
    Adjustment,
    ReturnEntry,
    ReturnOutput,
}

impl MovementReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementReason::PurchaseEntry => "purchase_entry",
            MovementReason::ExitSale => "exit_sale",
            MovementReason::Transfer => "transfer",
            MovementReason::Adjustment => "adjustment",
            MovementReason::ReturnEntry => "return_entry",
            MovementReason::ReturnOutput => "return_output",
        }
    }
}

/// Originating business event of a movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "movement_reference", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    Purchase,
    Payment,
    Manual,
    Sale,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::Purchase => "purchase",
            ReferenceType::Payment => "payment",
            ReferenceType::Manual => "manual",
            ReferenceType::Sale => "sale",
        }
    }
}

/// Immutable audit record of one quantity delta. `from_location = NULL`
/// encodes pure injection, `to_location = NULL` pure removal.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Movement {
    pub id: i64,
    pub product_id: Uuid,
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub from_location: Option<Uuid>,
    pub to_location: Option<Uuid>,
    pub quantity: i64,
    pub reason: MovementReason,
    pub description: String,
    pub reference_type: ReferenceType,
    pub reference_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
    pub created_by: Option<Uuid>,
}

/// Input for the two entry-shaped operations (purchase entry, return entry)
#[derive(Debug, Clone, Deserialize)]
pub struct EntryInput {
    pub product_id: Uuid,
    pub to_location: Uuid,
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub description: String,
    pub quantity: i64,
    pub reference_id: Option<Uuid>,
}

/// Input for recording a sale exit
#[derive(Debug, Clone, Deserialize)]
pub struct ExitSaleInput {
    pub product_id: Uuid,
    pub from_location: Uuid,
    pub description: String,
    pub quantity: i64,
    pub reference_id: Option<Uuid>,
}

/// Input for transferring stock between locations
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub product_id: Uuid,
    pub from_location: Uuid,
    pub to_location: Uuid,
    pub description: String,
    pub quantity: i64,
    pub reference_id: Option<Uuid>,
}

/// Input for a manual adjustment. Exactly one of `aggregate`, `remove` or
/// `reclassify` must be selected.
#[derive(Debug, Clone, Deserialize)]
pub struct AdjustmentInput {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub description: String,
    pub quantity: i64,
    pub reference_id: Option<Uuid>,
    #[serde(default)]
    pub aggregate: bool,
    #[serde(default)]
    pub remove: bool,
    #[serde(default)]
    pub reclassify: Option<ReclassifyTarget>,
}

/// New lot/expiry/location for a reclassify adjustment
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReclassifyTarget {
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub location_id: Option<Uuid>,
}

/// The single mode selected by an [`AdjustmentInput`]
#[derive(Debug, PartialEq)]
pub enum AdjustmentMode<'a> {
    Aggregate,
    Remove,
    Reclassify(&'a ReclassifyTarget),
}

impl AdjustmentInput {
    /// Resolve the selected adjustment mode, rejecting zero or multiple picks.
    pub fn mode(&self) -> AppResult<AdjustmentMode<'_>> {
        let picked = [self.aggregate, self.remove, self.reclassify.is_some()]
            .iter()
            .filter(|p| **p)
            .count();
        if picked != 1 {
            return Err(AppError::Validation {
                field: "aggregate/remove/reclassify".to_string(),
                message: "exactly one option must be selected".to_string(),
            });
        }
        if self.aggregate {
            Ok(AdjustmentMode::Aggregate)
        } else if self.remove {
            Ok(AdjustmentMode::Remove)
        } else {
            // picked == 1 and neither flag is set, so reclassify is present
            Ok(AdjustmentMode::Reclassify(
                self.reclassify.as_ref().ok_or(AppError::Validation {
                    field: "reclassify".to_string(),
                    message: "reclassify target is missing".to_string(),
                })?,
            ))
        }
    }
}

/// Input for decrementing one explicit lot (return output)
#[derive(Debug, Clone, Deserialize)]
pub struct ReturnOutputInput {
    pub product_id: Uuid,
    pub from_location: Uuid,
    pub lot_code: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub description: String,
    pub quantity: i64,
    pub reference_id: Option<Uuid>,
}

/// Uniform success payload of a mutation: the net quantity moved, the
/// resulting ledger row when the operation targets a single key, and the
/// number of movements written.
#[derive(Debug, Serialize)]
pub struct OperationReceipt {
    pub quantity: i64,
    pub record: Option<StockRecord>,
    pub movement_count: i64,
}
