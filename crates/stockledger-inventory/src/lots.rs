//! FIFO cost-lot matching.
//!
//! Additions merge into the newest open lot with the same unit cost or open a
//! new lot. Deductions are planned in full against the open lots before
//! anything is written, so a deduction either draws its whole quantity or
//! writes nothing.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use stockledger_core::{
    EntryMetadata, LedgerEntry, LedgerError, LedgerResult, LedgerTx, NewLedgerEntry, StockRecord,
    normalize_unit_cost,
};
use tracing::debug;

/// One planned draw against a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotDraw {
    pub lot_id: i64,
    pub unit_cost: Decimal,
    pub quantity: i64,
    pub remaining_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LotState {
    Open { remaining: i64 },
    Exhausted,
}

/// Why a draw plan could not cover the requested quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    /// No lot was consumable at all.
    NoLots,
    /// Lots ran out after `covered` units.
    Uncovered { covered: i64 },
}

/// Plans draws covering `need` units from `lots`.
///
/// The lot named by `preferred` (the source of the latest deduction) is used
/// first while it stays open; otherwise the oldest open lot is used. Lots are
/// tracked by id so two lots with the same cost are never confused.
pub fn plan_draws(
    lots: &[LedgerEntry],
    preferred: Option<i64>,
    need: i64,
) -> Result<Vec<LotDraw>, Shortfall> {
    let mut states: BTreeMap<i64, (Decimal, LotState)> = lots
        .iter()
        .filter(|lot| lot.is_open_lot())
        .map(|lot| {
            (
                lot.id,
                (
                    lot.unit_cost,
                    LotState::Open {
                        remaining: lot.remaining_quantity,
                    },
                ),
            )
        })
        .collect();

    let mut preferred = preferred;
    let mut need = need;
    let mut draws = Vec::new();

    while need > 0 {
        let selected = preferred
            .and_then(|id| open_lot(&states, id))
            .or_else(|| states.keys().find_map(|id| open_lot(&states, *id)));

        let Some((lot_id, unit_cost, remaining)) = selected else {
            let covered: i64 = draws.iter().map(|draw: &LotDraw| draw.quantity).sum();
            return Err(if covered == 0 {
                Shortfall::NoLots
            } else {
                Shortfall::Uncovered { covered }
            });
        };

        let taken = remaining.min(need);
        let remaining_after = remaining - taken;
        let state = if remaining_after == 0 {
            LotState::Exhausted
        } else {
            LotState::Open {
                remaining: remaining_after,
            }
        };
        states.insert(lot_id, (unit_cost, state));

        draws.push(LotDraw {
            lot_id,
            unit_cost,
            quantity: taken,
            remaining_after,
        });
        need -= taken;
        preferred = Some(lot_id);
    }

    Ok(draws)
}

fn open_lot(
    states: &BTreeMap<i64, (Decimal, LotState)>,
    id: i64,
) -> Option<(i64, Decimal, i64)> {
    match states.get(&id) {
        Some((unit_cost, LotState::Open { remaining })) => Some((id, *unit_cost, *remaining)),
        _ => None,
    }
}

/// Records a signed quantity change for `record` in the ledger.
///
/// Positive deltas need a unit cost; negative deltas discover their cost from
/// the lots they consume and may produce several entries.
pub async fn apply<T: LedgerTx>(
    tx: &mut T,
    record: &StockRecord,
    delta: i64,
    unit_cost: Option<Decimal>,
    metadata: &EntryMetadata,
) -> LedgerResult<Vec<LedgerEntry>> {
    if delta == 0 {
        return Err(LedgerError::InvalidQuantity(delta));
    }

    if delta > 0 {
        let unit_cost = unit_cost.ok_or(LedgerError::MissingUnitCost)?;
        let lot = add_to_lot(tx, record, delta, normalize_unit_cost(unit_cost)?, metadata).await?;
        Ok(vec![lot])
    } else {
        let need = delta
            .checked_neg()
            .ok_or(LedgerError::InvalidQuantity(delta))?;
        deduct_from_lots(tx, record, need, metadata).await
    }
}

async fn add_to_lot<T: LedgerTx>(
    tx: &mut T,
    record: &StockRecord,
    quantity: i64,
    unit_cost: Decimal,
    metadata: &EntryMetadata,
) -> LedgerResult<LedgerEntry> {
    let open_lots = tx.open_lots(record.id).await?;

    if let Some(lot) = open_lots.iter().rev().find(|lot| lot.unit_cost == unit_cost) {
        debug!(
            lot_id = lot.id,
            stock_id = %record.stock_id,
            quantity,
            "merging addition into open lot"
        );
        return tx.grow_lot(lot.id, quantity, metadata.recorded_at).await;
    }

    let mut entry = NewLedgerEntry::for_record(record, metadata);
    entry.quantity_change = quantity;
    entry.unit_cost = unit_cost;
    entry.remaining_quantity = quantity;
    tx.append_entry(entry).await
}

async fn deduct_from_lots<T: LedgerTx>(
    tx: &mut T,
    record: &StockRecord,
    need: i64,
    metadata: &EntryMetadata,
) -> LedgerResult<Vec<LedgerEntry>> {
    let open_lots = tx.open_lots(record.id).await?;
    let preferred = tx
        .latest_deduction(record.id)
        .await?
        .and_then(|entry| entry.source_entry_id);

    let draws = plan_draws(&open_lots, preferred, need).map_err(|shortfall| match shortfall {
        Shortfall::NoLots => LedgerError::NoCostBasisFound {
            stock_record_id: record.id,
            stock_id: record.stock_id.clone(),
        },
        Shortfall::Uncovered { covered } => LedgerError::InsufficientQuantity {
            stock_id: record.stock_id.clone(),
            requested: need,
            available: covered,
        },
    })?;

    let mut written = Vec::with_capacity(draws.len());
    for draw in draws {
        tx.set_lot_remaining(draw.lot_id, draw.remaining_after).await?;

        let mut entry = NewLedgerEntry::for_record(record, metadata);
        entry.quantity_change = -draw.quantity;
        entry.unit_cost = draw.unit_cost;
        entry.source_entry_id = Some(draw.lot_id);
        written.push(tx.append_entry(entry).await?);
    }

    debug!(
        stock_id = %record.stock_id,
        lots = written.len(),
        quantity = need,
        "deduction matched against lots"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use super::*;

    fn lot(id: i64, unit_cost: Decimal, quantity: i64, remaining: i64) -> LedgerEntry {
        LedgerEntry {
            id,
            stock_record_id: 1,
            stock_id: "ENV-10".to_string(),
            location_id: 1,
            customer_id: 1,
            category: "Envelope".to_string(),
            quantity_change: quantity,
            unit_cost,
            remaining_quantity: remaining,
            source_entry_id: None,
            notes: String::new(),
            reference: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn draws_oldest_lot_first() {
        let lots = [lot(1, dec!(1), 5, 5), lot(2, dec!(2), 5, 5)];
        let draws = plan_draws(&lots, None, 7).unwrap();
        assert_eq!(
            draws,
            vec![
                LotDraw {
                    lot_id: 1,
                    unit_cost: dec!(1),
                    quantity: 5,
                    remaining_after: 0,
                },
                LotDraw {
                    lot_id: 2,
                    unit_cost: dec!(2),
                    quantity: 2,
                    remaining_after: 3,
                },
            ]
        );
    }

    #[test]
    fn partial_draw_stops_within_a_lot() {
        let lots = [lot(1, dec!(1), 5, 5)];
        let draws = plan_draws(&lots, None, 3).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].quantity, 3);
        assert_eq!(draws[0].remaining_after, 2);
    }

    #[test]
    fn preferred_lot_is_used_while_open() {
        let lots = [lot(1, dec!(1), 5, 5), lot(2, dec!(2), 5, 4)];
        let draws = plan_draws(&lots, Some(2), 6).unwrap();
        assert_eq!(draws[0].lot_id, 2);
        assert_eq!(draws[0].quantity, 4);
        assert_eq!(draws[1].lot_id, 1);
        assert_eq!(draws[1].quantity, 2);
    }

    #[test]
    fn exhausted_preferred_lot_falls_back_to_oldest_open() {
        let lots = [lot(1, dec!(1), 5, 0), lot(2, dec!(1), 5, 5)];
        let draws = plan_draws(&lots, Some(1), 2).unwrap();
        assert_eq!(draws, vec![LotDraw {
            lot_id: 2,
            unit_cost: dec!(1),
            quantity: 2,
            remaining_after: 3,
        }]);
    }

    #[test]
    fn same_cost_lots_are_tracked_separately() {
        let lots = [lot(1, dec!(3), 4, 4), lot(2, dec!(3), 6, 6)];
        let draws = plan_draws(&lots, None, 10).unwrap();
        assert_eq!(draws.len(), 2);
        assert_eq!(draws[0].lot_id, 1);
        assert_eq!(draws[1].lot_id, 2);
        assert!(draws.iter().all(|draw| draw.remaining_after == 0));
    }

    #[test]
    fn no_lots_is_reported_separately_from_a_shortfall() {
        assert_eq!(plan_draws(&[], None, 1), Err(Shortfall::NoLots));

        let lots = [lot(1, dec!(1), 5, 0)];
        assert_eq!(plan_draws(&lots, None, 1), Err(Shortfall::NoLots));

        let lots = [lot(1, dec!(1), 5, 2), lot(2, dec!(2), 5, 1)];
        assert_eq!(
            plan_draws(&lots, None, 4),
            Err(Shortfall::Uncovered { covered: 3 })
        );
    }

    #[test]
    fn negative_entries_are_never_lots() {
        let mut consumed = lot(3, dec!(1), -2, 0);
        consumed.source_entry_id = Some(1);
        let lots = [consumed, lot(4, dec!(5), 1, 1)];
        let draws = plan_draws(&lots, None, 1).unwrap();
        assert_eq!(draws[0].lot_id, 4);
    }

    #[tokio::test]
    async fn unrepresentable_deduction_is_rejected() {
        use stockledger_core::{LedgerStore, NewStockRecord, Ownership, StockDefaults, StockKey};
        use stockledger_memstore::InMemoryLedgerStore;

        let store = InMemoryLedgerStore::new();
        let mut tx = store.begin().await.unwrap();
        let record = tx
            .insert_stock(NewStockRecord {
                key: StockKey::new("ENV-10", 1, Ownership::House),
                defaults: StockDefaults {
                    customer_id: 1,
                    category: "Envelope".to_string(),
                    description: String::new(),
                    notes: String::new(),
                    unit_cost: dec!(1),
                    min_quantity: 0,
                    max_quantity: 0,
                    is_active: true,
                },
                quantity: 5,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let err = apply(&mut tx, &record, i64::MIN, None, &EntryMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidQuantity(i64::MIN)));
    }
}
