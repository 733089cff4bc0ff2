//! First-expire-first-out consumption planning.
//!
//! The planner is pure: the executing service locks every candidate row for
//! the duration of the enclosing transaction before planning, then applies
//! the returned splits. Holding the locks is what makes the up-front
//! sufficiency check safe from concurrent interference.

use chrono::NaiveDate;

use crate::error::{AppError, AppResult};
use crate::models::inventory::max_expiry_date;
use crate::models::{StockRecord, NO_LOT_CODE};

/// One ledger row as seen by the planner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FefoRow {
    pub record_id: i64,
    pub lot_code: String,
    pub expiry_date: NaiveDate,
    pub quantity: i64,
}

impl From<&StockRecord> for FefoRow {
    fn from(record: &StockRecord) -> Self {
        Self {
            record_id: record.id,
            lot_code: record.lot_code.clone(),
            expiry_date: record.expiry_date,
            quantity: record.quantity,
        }
    }
}

/// One `(row, amount taken)` pair of a consumption plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumptionSplit {
    pub record_id: i64,
    pub lot_code: String,
    pub expiry_date: NaiveDate,
    pub take: i64,
    /// The split consumes the row completely; the caller deletes it.
    pub drained: bool,
}

impl ConsumptionSplit {
    /// Caller-facing lot code, `None` for the sentinel.
    pub fn lot_code_opt(&self) -> Option<&str> {
        (self.lot_code != NO_LOT_CODE).then_some(self.lot_code.as_str())
    }

    /// Caller-facing expiry, `None` for the sentinel.
    pub fn expiry_date_opt(&self) -> Option<NaiveDate> {
        (self.expiry_date != max_expiry_date()).then_some(self.expiry_date)
    }
}

/// Select rows to drain, earliest expiry first, until `requested` is covered.
///
/// Ties on equal expiry break by row id, i.e. creation order. The sentinel
/// expiry sorts after every real date, so untracked stock drains last.
/// Sufficiency is checked before any split is produced: a plan either covers
/// the full request or nothing happens.
pub fn plan_consumption(
    mut rows: Vec<FefoRow>,
    requested: i64,
) -> AppResult<Vec<ConsumptionSplit>> {
    if requested <= 0 {
        return Err(AppError::InvalidQuantity);
    }

    rows.sort_by(|a, b| (a.expiry_date, a.record_id).cmp(&(b.expiry_date, b.record_id)));

    let available: i64 = rows.iter().map(|r| r.quantity.max(0)).sum();
    if available < requested {
        return Err(AppError::InsufficientStock {
            requested,
            available,
        });
    }

    let mut remaining = requested;
    let mut splits = Vec::new();
    let mut rows = rows.into_iter();
    while remaining > 0 {
        // Rows are locked, so exhaustion here cannot happen; fail loudly
        // rather than under-consume if it ever does.
        let row = rows.next().ok_or(AppError::InsufficientStock {
            requested,
            available: requested - remaining,
        })?;
        if row.quantity <= 0 {
            continue;
        }

        let take = row.quantity.min(remaining);
        splits.push(ConsumptionSplit {
            record_id: row.record_id,
            lot_code: row.lot_code,
            expiry_date: row.expiry_date,
            take,
            drained: take == row.quantity,
        });
        remaining -= take;
    }

    Ok(splits)
}
