//! FEFO consumption planning tests
//!
//! Covers ordering (earliest expiry first, creation-order tie-break),
//! exactness of splits, and fail-fast sufficiency checking.

use chrono::NaiveDate;
use proptest::prelude::*;

use compras_inventory::error::AppError;
use compras_inventory::services::fefo::{plan_consumption, FefoRow};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn row(record_id: i64, expiry: NaiveDate, quantity: i64) -> FefoRow {
    FefoRow {
        record_id,
        lot_code: format!("LOT-{record_id}"),
        expiry_date: expiry,
        quantity,
    }
}

#[cfg(test)]
mod unit_tests {
    use super::*;

    /// Rows {2025-12-01, qty 2} and {2026-01-01, qty 5}; consuming 6 yields
    /// [(2025-12-01, 2), (2026-01-01, 4)] in that order.
    #[test]
    fn test_earliest_expiry_drains_first() {
        let rows = vec![
            row(2, date(2026, 1, 1), 5),
            row(1, date(2025, 12, 1), 2),
        ];

        let splits = plan_consumption(rows, 6).unwrap();

        assert_eq!(splits.len(), 2);
        assert_eq!(splits[0].expiry_date, date(2025, 12, 1));
        assert_eq!(splits[0].take, 2);
        assert!(splits[0].drained);
        assert_eq!(splits[1].expiry_date, date(2026, 1, 1));
        assert_eq!(splits[1].take, 4);
        assert!(!splits[1].drained);
    }

    /// Equal expiry dates break ties by row id (creation order).
    #[test]
    fn test_tie_break_by_creation_order() {
        let expiry = date(2025, 6, 30);
        let rows = vec![row(9, expiry, 4), row(3, expiry, 4)];

        let splits = plan_consumption(rows, 5).unwrap();

        assert_eq!(splits[0].record_id, 3);
        assert_eq!(splits[0].take, 4);
        assert_eq!(splits[1].record_id, 9);
        assert_eq!(splits[1].take, 1);
    }

    #[test]
    fn test_single_row_partial_take() {
        let splits = plan_consumption(vec![row(1, date(2025, 1, 1), 10)], 3).unwrap();

        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].take, 3);
        assert!(!splits[0].drained);
    }

    #[test]
    fn test_exact_drain_flags_row_for_deletion() {
        let splits = plan_consumption(vec![row(1, date(2025, 1, 1), 7)], 7).unwrap();

        assert_eq!(splits.len(), 1);
        assert!(splits[0].drained);
    }

    /// Sufficiency is checked before any split is produced.
    #[test]
    fn test_insufficient_stock_fails_fast() {
        let rows = vec![
            row(1, date(2025, 1, 1), 2),
            row(2, date(2025, 2, 1), 3),
        ];

        let err = plan_consumption(rows, 6).unwrap_err();

        match err {
            AppError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, 6);
                assert_eq!(available, 5);
            }
            other => panic!("expected InsufficientStock, got {other:?}"),
        }
    }

    #[test]
    fn test_no_stock_at_all() {
        let err = plan_consumption(vec![], 1).unwrap_err();
        assert!(matches!(
            err,
            AppError::InsufficientStock {
                requested: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let err = plan_consumption(vec![row(1, date(2025, 1, 1), 5)], 0).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let err = plan_consumption(vec![row(1, date(2025, 1, 1), 5)], -4).unwrap_err();
        assert!(matches!(err, AppError::InvalidQuantity));
    }

    /// Zero-quantity rows contribute nothing and are skipped.
    #[test]
    fn test_empty_rows_are_skipped() {
        let rows = vec![
            row(1, date(2025, 1, 1), 0),
            row(2, date(2025, 2, 1), 5),
        ];

        let splits = plan_consumption(rows, 5).unwrap();

        assert_eq!(splits.len(), 1);
        assert_eq!(splits[0].record_id, 2);
    }

    /// Untracked stock carries the sentinel expiry and drains last.
    #[test]
    fn test_untracked_stock_drains_last() {
        let sentinel = date(9999, 12, 31);
        let rows = vec![
            row(1, sentinel, 10),
            row(2, date(2025, 3, 1), 4),
        ];

        let splits = plan_consumption(rows, 6).unwrap();

        assert_eq!(splits[0].record_id, 2);
        assert_eq!(splits[0].take, 4);
        assert_eq!(splits[1].record_id, 1);
        assert_eq!(splits[1].take, 2);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;

    fn expiry_strategy() -> impl Strategy<Value = NaiveDate> {
        (0i64..3650).prop_map(|offset| date(2025, 1, 1) + chrono::Duration::days(offset))
    }

    fn rows_strategy() -> impl Strategy<Value = Vec<FefoRow>> {
        prop::collection::vec((expiry_strategy(), 0i64..200), 1..12).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (expiry, quantity))| row(i as i64 + 1, expiry, quantity))
                .collect()
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Splits always sum exactly to the requested quantity.
        #[test]
        fn prop_splits_sum_to_request(rows in rows_strategy(), requested in 1i64..500) {
            let available: i64 = rows.iter().map(|r| r.quantity).sum();

            match plan_consumption(rows, requested) {
                Ok(splits) => {
                    prop_assert!(available >= requested);
                    let taken: i64 = splits.iter().map(|s| s.take).sum();
                    prop_assert_eq!(taken, requested);
                }
                Err(AppError::InsufficientStock { .. }) => {
                    prop_assert!(available < requested);
                }
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        /// No split takes more than its row holds, and every take is positive.
        #[test]
        fn prop_takes_bounded_by_row_quantity(rows in rows_strategy(), requested in 1i64..500) {
            let by_id: std::collections::HashMap<i64, i64> =
                rows.iter().map(|r| (r.record_id, r.quantity)).collect();

            if let Ok(splits) = plan_consumption(rows, requested) {
                for split in &splits {
                    prop_assert!(split.take > 0);
                    prop_assert!(split.take <= by_id[&split.record_id]);
                    prop_assert_eq!(split.drained, split.take == by_id[&split.record_id]);
                }
            }
        }

        /// Splits come out in ascending (expiry, id) order and every split
        /// before the last one drains its row completely.
        #[test]
        fn prop_splits_ordered_by_expiry(rows in rows_strategy(), requested in 1i64..500) {
            if let Ok(splits) = plan_consumption(rows, requested) {
                for pair in splits.windows(2) {
                    prop_assert!(
                        (pair[0].expiry_date, pair[0].record_id)
                            < (pair[1].expiry_date, pair[1].record_id)
                    );
                }
                for split in splits.iter().rev().skip(1) {
                    prop_assert!(split.drained);
                }
            }
        }

        /// A failed plan is a pure rejection: it never returns partial splits.
        #[test]
        fn prop_failure_is_all_or_nothing(rows in rows_strategy()) {
            let available: i64 = rows.iter().map(|r| r.quantity).sum();
            let result = plan_consumption(rows, available + 1);
            let is_insufficient = matches!(result, Err(AppError::InsufficientStock { .. }));
            prop_assert!(is_insufficient);
        }
    }
}
