//! Stock ledger operation handlers.
//!
//! Each operation runs inside a single transaction: every read-then-write
//! path locks the matching ledger rows with `SELECT ... FOR UPDATE` and
//! holds the locks until commit or abort, so operations on the same
//! composite key serialize while disjoint keys proceed in parallel. Either
//! everything commits, ledger mutation and movement rows together, or
//! nothing does.

use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{is_unique_violation, AppError, AppResult};
use crate::models::inventory::max_expiry_date;
use crate::models::{
    AdjustmentInput, AdjustmentMode, EntryInput, ExitSaleInput, LotKey, MovementReason,
    OperationReceipt, ReclassifyTarget, ReferenceType, ReturnOutputInput, StockRecord,
    TransferInput,
};
use crate::services::fefo::{self, FefoRow};

/// Inventory service owning all ledger mutations and queries
#[derive(Clone)]
pub struct InventoryService {
    db: PgPool,
}

/// Movement row to append, in caller-facing form (no sentinels)
struct NewMovement {
    product_id: Uuid,
    lot_code: Option<String>,
    expiry_date: Option<chrono::NaiveDate>,
    from_location: Option<Uuid>,
    to_location: Option<Uuid>,
    quantity: i64,
    reason: MovementReason,
    description: String,
    reference_type: ReferenceType,
    reference_id: Option<Uuid>,
    created_by: Uuid,
}

fn validate_quantity(quantity: i64) -> AppResult<()> {
    if quantity <= 0 {
        return Err(AppError::InvalidQuantity);
    }
    Ok(())
}

impl InventoryService {
    /// Create a new InventoryService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Record a stock entry from a supplier purchase: increment-or-create at
    /// `(product, to_location, lot, expiry)` plus one `purchase_entry`
    /// movement with no source location.
    pub async fn purchase_entry(
        &self,
        actor: Uuid,
        input: EntryInput,
    ) -> AppResult<OperationReceipt> {
        self.entry(
            actor,
            input,
            MovementReason::PurchaseEntry,
            ReferenceType::Purchase,
        )
        .await
    }

    /// Record a stock entry from a customer return. Same upsert shape as
    /// [`Self::purchase_entry`] under a different business reason.
    pub async fn return_entry(
        &self,
        actor: Uuid,
        input: EntryInput,
    ) -> AppResult<OperationReceipt> {
        self.entry(
            actor,
            input,
            MovementReason::ReturnEntry,
            ReferenceType::Manual,
        )
        .await
    }

    async fn entry(
        &self,
        actor: Uuid,
        input: EntryInput,
        reason: MovementReason,
        reference_type: ReferenceType,
    ) -> AppResult<OperationReceipt> {
        validate_quantity(input.quantity)?;
        let key = LotKey::normalize(input.lot_code.as_deref(), input.expiry_date)?;

        let mut tx = self.db.begin().await?;

        let record =
            Self::upsert_record(&mut tx, input.product_id, input.to_location, &key, input.quantity, actor)
                .await?;
        Self::insert_movement(
            &mut tx,
            NewMovement {
                product_id: input.product_id,
                lot_code: key.lot_code_opt().map(str::to_string),
                expiry_date: key.expiry_date_opt(),
                from_location: None,
                to_location: Some(input.to_location),
                quantity: input.quantity,
                reason,
                description: input.description,
                reference_type,
                reference_id: input.reference_id,
                created_by: actor,
            },
        )
        .await?;

        tx.commit().await?;
        tracing::debug!(
            product = %input.product_id,
            location = %input.to_location,
            quantity = input.quantity,
            reason = reason.as_str(),
            "stock entry recorded"
        );

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: Some(record),
            movement_count: 1,
        })
    }

    /// Drain stock for a sale, earliest-expiring lots first. Appends one
    /// `exit_sale` movement per drained lot; the movement quantities sum to
    /// the requested amount.
    pub async fn exit_sale(&self, actor: Uuid, input: ExitSaleInput) -> AppResult<OperationReceipt> {
        validate_quantity(input.quantity)?;

        let mut tx = self.db.begin().await?;

        let rows = Self::lock_rows(&mut tx, input.product_id, input.from_location).await?;
        let splits =
            fefo::plan_consumption(rows.iter().map(FefoRow::from).collect(), input.quantity)?;

        for split in &splits {
            Self::apply_split(&mut tx, split, actor).await?;
            Self::insert_movement(
                &mut tx,
                NewMovement {
                    product_id: input.product_id,
                    lot_code: split.lot_code_opt().map(str::to_string),
                    expiry_date: split.expiry_date_opt(),
                    from_location: Some(input.from_location),
                    to_location: None,
                    quantity: split.take,
                    reason: MovementReason::ExitSale,
                    description: input.description.clone(),
                    reference_type: ReferenceType::Sale,
                    reference_id: input.reference_id,
                    created_by: actor,
                },
            )
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            product = %input.product_id,
            location = %input.from_location,
            quantity = input.quantity,
            splits = splits.len(),
            "sale exit recorded"
        );

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: None,
            movement_count: splits.len() as i64,
        })
    }

    /// Move stock between two locations. Drains the source FEFO and
    /// consolidates at the destination by lot/expiry, one `transfer`
    /// movement per drained lot.
    pub async fn transfer(&self, actor: Uuid, input: TransferInput) -> AppResult<OperationReceipt> {
        validate_quantity(input.quantity)?;
        if input.from_location == input.to_location {
            return Err(AppError::SameLocationTransfer);
        }

        let mut tx = self.db.begin().await?;

        let rows = Self::lock_rows(&mut tx, input.product_id, input.from_location).await?;
        let splits =
            fefo::plan_consumption(rows.iter().map(FefoRow::from).collect(), input.quantity)?;

        for split in &splits {
            Self::apply_split(&mut tx, split, actor).await?;

            let key = LotKey::from_storage(split.lot_code.clone(), split.expiry_date);
            Self::upsert_record(&mut tx, input.product_id, input.to_location, &key, split.take, actor)
                .await?;

            Self::insert_movement(
                &mut tx,
                NewMovement {
                    product_id: input.product_id,
                    lot_code: split.lot_code_opt().map(str::to_string),
                    expiry_date: split.expiry_date_opt(),
                    from_location: Some(input.from_location),
                    to_location: Some(input.to_location),
                    quantity: split.take,
                    reason: MovementReason::Transfer,
                    description: input.description.clone(),
                    reference_type: ReferenceType::Manual,
                    reference_id: input.reference_id,
                    created_by: actor,
                },
            )
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            product = %input.product_id,
            from = %input.from_location,
            to = %input.to_location,
            quantity = input.quantity,
            splits = splits.len(),
            "transfer recorded"
        );

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: None,
            movement_count: splits.len() as i64,
        })
    }

    /// Manually adjust one exact-match ledger row: add quantity, remove
    /// quantity, or reclassify the row to a new lot/expiry/location.
    pub async fn adjustment(
        &self,
        actor: Uuid,
        input: AdjustmentInput,
    ) -> AppResult<OperationReceipt> {
        validate_quantity(input.quantity)?;
        let mode = input.mode()?;
        let key = LotKey::normalize(input.lot_code.as_deref(), input.expiry_date)?;

        let mut tx = self.db.begin().await?;

        let record = Self::lock_exact(&mut tx, input.product_id, input.location_id, &key)
            .await?
            .ok_or_else(|| {
                AppError::RecordNotFound(format!(
                    "product {} at location {} (lot {}, expiry {})",
                    input.product_id,
                    input.location_id,
                    key.lot_code(),
                    key.expiry_date()
                ))
            })?;

        let receipt = match mode {
            AdjustmentMode::Aggregate => {
                Self::adjust_aggregate(&mut tx, &input, &key, &record, actor).await?
            }
            AdjustmentMode::Remove => {
                Self::adjust_remove(&mut tx, &input, &key, &record, actor).await?
            }
            AdjustmentMode::Reclassify(target) => {
                let target = target.clone();
                Self::adjust_reclassify(&mut tx, &input, &record, &target, actor).await?
            }
        };

        tx.commit().await?;
        tracing::debug!(
            product = %input.product_id,
            location = %input.location_id,
            quantity = input.quantity,
            "adjustment recorded"
        );

        Ok(receipt)
    }

    async fn adjust_aggregate(
        tx: &mut Transaction<'_, Postgres>,
        input: &AdjustmentInput,
        key: &LotKey,
        record: &StockRecord,
        actor: Uuid,
    ) -> AppResult<OperationReceipt> {
        let updated = sqlx::query_as::<_, StockRecord>(
            r#"
            UPDATE stock_records
            SET quantity = quantity + $2, updated_by = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, product_id, location_id, lot_code, expiry_date, quantity,
                      created_at, updated_at, updated_by
            "#,
        )
        .bind(record.id)
        .bind(input.quantity)
        .bind(actor)
        .fetch_one(&mut **tx)
        .await?;

        Self::insert_movement(
            tx,
            NewMovement {
                product_id: input.product_id,
                lot_code: key.lot_code_opt().map(str::to_string),
                expiry_date: key.expiry_date_opt(),
                from_location: None,
                to_location: Some(input.location_id),
                quantity: input.quantity,
                reason: MovementReason::Adjustment,
                description: input.description.clone(),
                reference_type: ReferenceType::Manual,
                reference_id: input.reference_id,
                created_by: actor,
            },
        )
        .await?;

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: Some(updated),
            movement_count: 1,
        })
    }

    async fn adjust_remove(
        tx: &mut Transaction<'_, Postgres>,
        input: &AdjustmentInput,
        key: &LotKey,
        record: &StockRecord,
        actor: Uuid,
    ) -> AppResult<OperationReceipt> {
        if input.quantity > record.quantity {
            return Err(AppError::InsufficientStock {
                requested: input.quantity,
                available: record.quantity,
            });
        }

        let remaining = Self::decrement_record(tx, record, input.quantity, actor).await?;

        Self::insert_movement(
            tx,
            NewMovement {
                product_id: input.product_id,
                lot_code: key.lot_code_opt().map(str::to_string),
                expiry_date: key.expiry_date_opt(),
                from_location: Some(input.location_id),
                to_location: None,
                quantity: input.quantity,
                reason: MovementReason::Adjustment,
                description: input.description.clone(),
                reference_type: ReferenceType::Manual,
                reference_id: input.reference_id,
                created_by: actor,
            },
        )
        .await?;

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: remaining,
            movement_count: 1,
        })
    }

    async fn adjust_reclassify(
        tx: &mut Transaction<'_, Postgres>,
        input: &AdjustmentInput,
        record: &StockRecord,
        target: &ReclassifyTarget,
        actor: Uuid,
    ) -> AppResult<OperationReceipt> {
        let new_code = target
            .lot_code
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());

        if new_code.is_none() && target.expiry_date.is_none() && target.location_id.is_none() {
            return Err(AppError::Validation {
                field: "reclassify".to_string(),
                message: "at least one of lot_code, expiry_date or location_id must change"
                    .to_string(),
            });
        }
        if let Some(expiry) = target.expiry_date {
            if expiry >= max_expiry_date() {
                return Err(AppError::InvalidDate(format!(
                    "{expiry} is reserved for untracked lots"
                )));
            }
        }

        // The target location is owned by an external collaborator and must
        // be re-validated before the row is rewritten.
        let new_location = match target.location_id {
            Some(location) => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS(SELECT 1 FROM storage_locations WHERE id = $1)",
                )
                .bind(location)
                .fetch_one(&mut **tx)
                .await?;
                if !exists {
                    return Err(AppError::InvalidLocationReference(location));
                }
                Some(location)
            }
            None => None,
        };

        let lot_code = new_code.unwrap_or_else(|| record.lot_code.clone());
        let expiry_date = target.expiry_date.unwrap_or(record.expiry_date);
        let location_id = new_location.unwrap_or(record.location_id);

        let updated = sqlx::query_as::<_, StockRecord>(
            r#"
            UPDATE stock_records
            SET lot_code = $2, expiry_date = $3, location_id = $4, updated_by = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, product_id, location_id, lot_code, expiry_date, quantity,
                      created_at, updated_at, updated_by
            "#,
        )
        .bind(record.id)
        .bind(&lot_code)
        .bind(expiry_date)
        .bind(location_id)
        .bind(actor)
        .fetch_one(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                tracing::warn!(
                    product = %input.product_id,
                    "reclassify target key already holds a ledger row"
                );
                AppError::ConcurrencyConflict(
                    "a ledger row already exists at the reclassify target key".to_string(),
                )
            } else {
                err.into()
            }
        })?;

        Self::insert_movement(
            tx,
            NewMovement {
                product_id: input.product_id,
                lot_code: updated.lot_code_opt().map(str::to_string),
                expiry_date: updated.expiry_date_opt(),
                from_location: Some(input.location_id),
                to_location: new_location,
                quantity: input.quantity,
                reason: MovementReason::ReturnEntry,
                description: input.description.clone(),
                reference_type: ReferenceType::Manual,
                reference_id: input.reference_id,
                created_by: actor,
            },
        )
        .await?;

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: Some(updated),
            movement_count: 1,
        })
    }

    /// Decrement one explicit lot for a return to a supplier. No FEFO: the
    /// caller names the exact row, which must exist and hold enough stock.
    pub async fn return_output(
        &self,
        actor: Uuid,
        input: ReturnOutputInput,
    ) -> AppResult<OperationReceipt> {
        validate_quantity(input.quantity)?;
        let key = LotKey::normalize(input.lot_code.as_deref(), input.expiry_date)?;

        let mut tx = self.db.begin().await?;

        let record = Self::lock_exact(&mut tx, input.product_id, input.from_location, &key)
            .await?
            .ok_or_else(|| {
                AppError::RecordNotFound(format!(
                    "product {} at location {} (lot {}, expiry {})",
                    input.product_id,
                    input.from_location,
                    key.lot_code(),
                    key.expiry_date()
                ))
            })?;

        if input.quantity > record.quantity {
            return Err(AppError::InsufficientStock {
                requested: input.quantity,
                available: record.quantity,
            });
        }

        let remaining = Self::decrement_record(&mut tx, &record, input.quantity, actor).await?;

        Self::insert_movement(
            &mut tx,
            NewMovement {
                product_id: input.product_id,
                lot_code: key.lot_code_opt().map(str::to_string),
                expiry_date: key.expiry_date_opt(),
                from_location: Some(input.from_location),
                to_location: None,
                quantity: input.quantity,
                reason: MovementReason::ReturnOutput,
                description: input.description,
                reference_type: ReferenceType::Manual,
                reference_id: input.reference_id,
                created_by: actor,
            },
        )
        .await?;

        tx.commit().await?;
        tracing::debug!(
            product = %input.product_id,
            location = %input.from_location,
            quantity = input.quantity,
            "return output recorded"
        );

        Ok(OperationReceipt {
            quantity: input.quantity,
            record: remaining,
            movement_count: 1,
        })
    }

    /// List current ledger state, optionally filtered by product and/or
    /// location. Does not lock; may observe a slightly stale snapshot
    /// relative to in-flight transactions.
    pub async fn list_records(
        &self,
        product_id: Option<Uuid>,
        location_id: Option<Uuid>,
    ) -> AppResult<Vec<StockRecord>> {
        let records = sqlx::query_as::<_, StockRecord>(
            r#"
            SELECT id, product_id, location_id, lot_code, expiry_date, quantity,
                   created_at, updated_at, updated_by
            FROM stock_records
            WHERE ($1::uuid IS NULL OR product_id = $1)
              AND ($2::uuid IS NULL OR location_id = $2)
            ORDER BY product_id, location_id, expiry_date, id
            "#,
        )
        .bind(product_id)
        .bind(location_id)
        .fetch_all(&self.db)
        .await?;

        Ok(records)
    }

    /// Fetch the single ledger row for a product at a location, earliest
    /// expiry first when the product spans several lots.
    pub async fn find_record(
        &self,
        product_id: Uuid,
        location_id: Uuid,
    ) -> AppResult<StockRecord> {
        sqlx::query_as::<_, StockRecord>(
            r#"
            SELECT id, product_id, location_id, lot_code, expiry_date, quantity,
                   created_at, updated_at, updated_by
            FROM stock_records
            WHERE product_id = $1 AND location_id = $2
            ORDER BY expiry_date, id
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(location_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| {
            AppError::RecordNotFound(format!(
                "product {product_id} at location {location_id}"
            ))
        })
    }

    /// Lock every ledger row for `(product, location)` in deterministic
    /// order. Lock acquisition order fixes the mutation order for a key.
    async fn lock_rows(
        tx: &mut Transaction<'_, Postgres>,
        product_id: Uuid,
        location_id: Uuid,
    ) -> AppResult<Vec<StockRecord>> {
        let rows = sqlx::query_as::<_, StockRecord>(
            r#"
            SELECT id, product_id, location_id, lot_code, expiry_date, quantity,
                   created_at, updated_at, updated_by
            FROM stock_records
            WHERE product_id = $1 AND location_id = $2
            ORDER BY expiry_date ASC, id ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(location_id)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows)
    }

    /// Lock the single row matching a fully-normalized composite key.
    async fn lock_exact(
        tx: &mut Transaction<'_, Postgres>,
        product_id: Uuid,
        location_id: Uuid,
        key: &LotKey,
    ) -> AppResult<Option<StockRecord>> {
        let row = sqlx::query_as::<_, StockRecord>(
            r#"
            SELECT id, product_id, location_id, lot_code, expiry_date, quantity,
                   created_at, updated_at, updated_by
            FROM stock_records
            WHERE product_id = $1 AND location_id = $2 AND lot_code = $3 AND expiry_date = $4
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(location_id)
        .bind(key.lot_code())
        .bind(key.expiry_date())
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row)
    }

    /// Increment-or-create at a composite key in one atomic statement. The
    /// native upsert removes the insert-then-retry race of the get-or-create
    /// pattern entirely.
    async fn upsert_record(
        tx: &mut Transaction<'_, Postgres>,
        product_id: Uuid,
        location_id: Uuid,
        key: &LotKey,
        quantity: i64,
        actor: Uuid,
    ) -> AppResult<StockRecord> {
        let record = sqlx::query_as::<_, StockRecord>(
            r#"
            INSERT INTO stock_records (product_id, location_id, lot_code, expiry_date, quantity, updated_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (product_id, location_id, lot_code, expiry_date)
            DO UPDATE SET quantity = stock_records.quantity + EXCLUDED.quantity,
                          updated_by = EXCLUDED.updated_by,
                          updated_at = NOW()
            RETURNING id, product_id, location_id, lot_code, expiry_date, quantity,
                      created_at, updated_at, updated_by
            "#,
        )
        .bind(product_id)
        .bind(location_id)
        .bind(key.lot_code())
        .bind(key.expiry_date())
        .bind(quantity)
        .bind(actor)
        .fetch_one(&mut **tx)
        .await?;

        Ok(record)
    }

    /// Apply one FEFO split: decrement the row, or delete it when drained.
    async fn apply_split(
        tx: &mut Transaction<'_, Postgres>,
        split: &fefo::ConsumptionSplit,
        actor: Uuid,
    ) -> AppResult<()> {
        if split.drained {
            sqlx::query("DELETE FROM stock_records WHERE id = $1")
                .bind(split.record_id)
                .execute(&mut **tx)
                .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE stock_records
                SET quantity = quantity - $2, updated_by = $3, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(split.record_id)
            .bind(split.take)
            .bind(actor)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Decrement a locked row, deleting it when it reaches exactly zero.
    /// Returns the surviving row, if any. Callers check sufficiency first.
    async fn decrement_record(
        tx: &mut Transaction<'_, Postgres>,
        record: &StockRecord,
        quantity: i64,
        actor: Uuid,
    ) -> AppResult<Option<StockRecord>> {
        if record.quantity == quantity {
            sqlx::query("DELETE FROM stock_records WHERE id = $1")
                .bind(record.id)
                .execute(&mut **tx)
                .await?;
            return Ok(None);
        }

        let updated = sqlx::query_as::<_, StockRecord>(
            r#"
            UPDATE stock_records
            SET quantity = quantity - $2, updated_by = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING id, product_id, location_id, lot_code, expiry_date, quantity,
                      created_at, updated_at, updated_by
            "#,
        )
        .bind(record.id)
        .bind(quantity)
        .bind(actor)
        .fetch_one(&mut **tx)
        .await?;

        Ok(Some(updated))
    }

    /// Append one movement row in the same transaction as its ledger
    /// mutation, so they commit or abort together.
    async fn insert_movement(
        tx: &mut Transaction<'_, Postgres>,
        movement: NewMovement,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stock_movements (
                product_id, lot_code, expiry_date, from_location, to_location,
                quantity, reason, description, reference_type, reference_id, created_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(movement.product_id)
        .bind(&movement.lot_code)
        .bind(movement.expiry_date)
        .bind(movement.from_location)
        .bind(movement.to_location)
        .bind(movement.quantity)
        .bind(movement.reason)
        .bind(&movement.description)
        .bind(movement.reference_type)
        .bind(movement.reference_id)
        .bind(movement.created_by)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Trace movements back to their originating business event.
    pub async fn movements_for_reference(
        &self,
        reference_type: ReferenceType,
        reference_id: Uuid,
    ) -> AppResult<Vec<crate::models::Movement>> {
        let movements = sqlx::query_as::<_, crate::models::Movement>(
            r#"
            SELECT id, product_id, lot_code, expiry_date, from_location, to_location,
                   quantity, reason, description, reference_type, reference_id,
                   occurred_at, created_by
            FROM stock_movements
            WHERE reference_type = $1 AND reference_id = $2
            ORDER BY id
            "#,
        )
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.db)
        .await?;

        Ok(movements)
    }
}
