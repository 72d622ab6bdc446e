use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use stockledger_core::{
    EntryMetadata, EntryQuery, LedgerEntry, LedgerError, LedgerStore, Ownership, StockDefaults,
    StockKey, StockQuery,
};
use stockledger_inventory::{
    Adjustment, BalanceFilter, HistoryFilter, InventoryLedger, StockAdjustment, TransferRequest,
};
use stockledger_memstore::InMemoryLedgerStore;

fn key(location_id: i64) -> StockKey {
    StockKey::new("ENV-10", location_id, Ownership::House)
}

fn defaults(unit_cost: Decimal) -> StockDefaults {
    StockDefaults {
        customer_id: 7,
        category: "Envelope".to_string(),
        description: "#10 window envelope".to_string(),
        notes: "aisle 4".to_string(),
        unit_cost,
        min_quantity: 3,
        max_quantity: 50,
        is_active: true,
    }
}

fn ledger() -> InventoryLedger<InMemoryLedgerStore> {
    InventoryLedger::new(InMemoryLedgerStore::new())
}

async fn receive(
    ledger: &InventoryLedger<InMemoryLedgerStore>,
    location_id: i64,
    quantity: i64,
    unit_cost: Decimal,
) -> StockAdjustment {
    ledger
        .adjust(
            &Adjustment::receive(key(location_id), quantity, unit_cost)
                .with_defaults(defaults(unit_cost)),
        )
        .await
        .unwrap()
}

async fn consume(
    ledger: &InventoryLedger<InMemoryLedgerStore>,
    location_id: i64,
    quantity: i64,
) -> Result<StockAdjustment, LedgerError> {
    ledger
        .adjust(&Adjustment::consume(key(location_id), quantity))
        .await
}

async fn all_entries(ledger: &InventoryLedger<InMemoryLedgerStore>) -> Vec<LedgerEntry> {
    ledger.store().entries(&EntryQuery::default()).await.unwrap()
}

fn moves(entries: &[LedgerEntry]) -> Vec<(i64, Decimal)> {
    entries
        .iter()
        .map(|entry| (entry.quantity_change, entry.unit_cost))
        .collect()
}

fn transfer_request(quantity: i64) -> TransferRequest {
    TransferRequest {
        stock_id: "ENV-10".to_string(),
        source_location: 1,
        destination_location: 2,
        ownership: Ownership::House,
        quantity,
        metadata: EntryMetadata::new("move to press room").with_reference("JT-100"),
    }
}

#[tokio::test]
async fn deductions_draw_lots_in_fifo_order() {
    let ledger = ledger();
    receive(&ledger, 1, 5, dec!(1)).await;
    receive(&ledger, 1, 5, dec!(2)).await;

    let used = consume(&ledger, 1, 7).await.unwrap();
    assert_eq!(moves(&used.entries), vec![(-5, dec!(1)), (-2, dec!(2))]);
    assert_eq!(used.record.quantity, 3);
    assert!(!used.removed);
    assert_eq!(used.entries[0].source_entry_id, Some(1));
    assert_eq!(used.entries[1].source_entry_id, Some(2));
    assert!(used.entries.iter().all(|entry| entry.remaining_quantity == 0));

    let used = consume(&ledger, 1, 1).await.unwrap();
    assert_eq!(moves(&used.entries), vec![(-1, dec!(2))]);

    let entries = all_entries(&ledger).await;
    assert_eq!(entries[0].remaining_quantity, 0);
    assert_eq!(entries[1].remaining_quantity, 2);
}

#[tokio::test]
async fn equal_cost_additions_merge_into_the_open_lot() {
    let ledger = ledger();
    receive(&ledger, 1, 5, dec!(1)).await;
    receive(&ledger, 1, 3, dec!(2)).await;
    let merged = receive(&ledger, 1, 2, dec!(1.0000)).await;

    assert_eq!(merged.entries.len(), 1);
    assert_eq!(merged.entries[0].id, 1);
    assert_eq!(merged.entries[0].quantity_change, 7);
    assert_eq!(merged.entries[0].remaining_quantity, 7);

    let entries = all_entries(&ledger).await;
    assert_eq!(moves(&entries), vec![(7, dec!(1)), (3, dec!(2))]);
    assert_eq!(merged.record.quantity, 10);
}

#[tokio::test]
async fn exhausted_lots_are_never_drawn_again() {
    let ledger = ledger();
    receive(&ledger, 1, 3, dec!(1)).await;
    receive(&ledger, 1, 3, dec!(2)).await;
    consume(&ledger, 1, 3).await.unwrap();

    // Lot 1 is exhausted, so the same cost opens a fresh lot.
    let added = receive(&ledger, 1, 3, dec!(1)).await;
    assert_ne!(added.entries[0].id, 1);

    let used = consume(&ledger, 1, 4).await.unwrap();
    assert_eq!(moves(&used.entries), vec![(-3, dec!(2)), (-1, dec!(1))]);
    assert_eq!(used.entries[0].source_entry_id, Some(2));
    assert_eq!(used.entries[1].source_entry_id, Some(added.entries[0].id));
}

#[tokio::test]
async fn insufficient_quantity_writes_nothing() {
    let ledger = ledger();
    receive(&ledger, 1, 5, dec!(1)).await;
    let before = all_entries(&ledger).await;

    let err = consume(&ledger, 1, 6).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientQuantity {
            requested: 6,
            available: 5,
            ..
        }
    ));

    assert_eq!(all_entries(&ledger).await, before);
    let records = ledger.stock_on_hand(&StockQuery::default()).await.unwrap();
    assert_eq!(records[0].record.quantity, 5);
}

#[tokio::test]
async fn invalid_adjustments_are_rejected() {
    let ledger = ledger();

    let err = consume(&ledger, 1, 1).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownStockLocation(_)));

    let err = ledger
        .adjust(&Adjustment::receive(key(1), 4, dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::UnknownStockLocation(_)));

    let err = ledger
        .adjust(&Adjustment::receive(key(1), 0, dec!(1)).with_defaults(defaults(dec!(1))))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(0)));

    let mut missing_cost = Adjustment::receive(key(1), 4, dec!(1)).with_defaults(defaults(dec!(1)));
    missing_cost.unit_cost = None;
    let err = ledger.adjust(&missing_cost).await.unwrap_err();
    assert!(matches!(err, LedgerError::MissingUnitCost));

    let err = ledger
        .adjust(&Adjustment::receive(key(1), 4, dec!(-1)).with_defaults(defaults(dec!(1))))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidUnitCost(_)));

    assert!(all_entries(&ledger).await.is_empty());
}

#[tokio::test]
async fn overflowing_deltas_are_rejected() {
    let ledger = ledger();
    receive(&ledger, 1, 10, dec!(1)).await;
    consume(&ledger, 1, 5).await.unwrap();
    let before = all_entries(&ledger).await;

    let err = ledger
        .adjust(&Adjustment::receive(key(1), i64::MAX, dec!(1)).with_defaults(defaults(dec!(1))))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(i64::MAX)));

    let mut drain = Adjustment::consume(key(1), 1);
    drain.delta = i64::MIN;
    let err = ledger.adjust(&drain).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(i64::MIN)));

    // The record has room but the merged lot's original quantity does not.
    let err = ledger
        .adjust(&Adjustment::receive(key(1), i64::MAX - 5, dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(quantity) if quantity == i64::MAX - 5));

    assert_eq!(all_entries(&ledger).await, before);
    let records = ledger.stock_on_hand(&StockQuery::default()).await.unwrap();
    assert_eq!(records[0].record.quantity, 5);
    assert!(ledger.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn transfer_preserves_each_lot_cost() {
    let ledger = ledger();
    receive(&ledger, 1, 5, dec!(1)).await;
    receive(&ledger, 1, 5, dec!(2)).await;

    let moved = ledger.transfer(&transfer_request(7)).await.unwrap();
    assert_eq!(moves(&moved.outbound), vec![(-5, dec!(1)), (-2, dec!(2))]);
    assert_eq!(moves(&moved.inbound), vec![(5, dec!(1)), (2, dec!(2))]);
    assert_eq!(moved.source.record.quantity, 3);
    assert_eq!(moved.destination.quantity, 7);
    assert_eq!(moved.destination.customer_id, 7);
    assert_eq!(moved.destination.category, "Envelope");
    assert_eq!(moved.destination.notes, "aisle 4");
    assert_eq!(moved.destination.min_quantity, 3);
    assert_eq!(moved.destination.unit_cost, dec!(1));
    assert!(
        moved
            .inbound
            .iter()
            .all(|entry| entry.reference.as_deref() == Some("JT-100"))
    );

    let balance = ledger.balance_as_of(&BalanceFilter::as_of(Utc::now())).await.unwrap();
    assert_eq!(balance.len(), 1);
    assert_eq!(balance[0].quantity, 10);
    assert_eq!(balance[0].value, dec!(15));

    let destination = ledger
        .transaction_history(&HistoryFilter {
            location_id: Some(2),
            ..HistoryFilter::default()
        })
        .await
        .unwrap();
    let value: Decimal = destination.iter().map(|row| row.value).sum();
    assert_eq!(value, dec!(9));

    assert!(ledger.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn transfer_merges_into_open_destination_lot() {
    let ledger = ledger();
    receive(&ledger, 1, 5, dec!(1)).await;
    let existing = receive(&ledger, 2, 2, dec!(1)).await;

    let moved = ledger.transfer(&transfer_request(4)).await.unwrap();
    assert_eq!(moved.inbound.len(), 1);
    assert_eq!(moved.inbound[0].id, existing.entries[0].id);
    assert_eq!(moved.inbound[0].quantity_change, 6);
    assert_eq!(moved.inbound[0].remaining_quantity, 6);
    assert_eq!(moved.destination.quantity, 6);
}

#[tokio::test]
async fn transfer_validates_before_writing() {
    let ledger = ledger();

    let err = ledger.transfer(&transfer_request(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownStockLocation(_)));

    receive(&ledger, 1, 5, dec!(1)).await;

    let err = ledger.transfer(&transfer_request(0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidQuantity(0)));

    let err = ledger.transfer(&transfer_request(6)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientQuantity { .. }));

    let mut same = transfer_request(1);
    same.destination_location = 1;
    let err = ledger.transfer(&same).await.unwrap_err();
    assert!(matches!(err, LedgerError::SameLocation(1)));

    assert_eq!(all_entries(&ledger).await.len(), 1);
}

#[tokio::test]
async fn emptied_record_is_deleted_but_history_remains() {
    let ledger = ledger();
    receive(&ledger, 1, 4, dec!(1.5)).await;

    let used = consume(&ledger, 1, 4).await.unwrap();
    assert!(used.removed);
    assert_eq!(used.record.quantity, 0);

    assert!(
        ledger
            .stock_on_hand(&StockQuery::default())
            .await
            .unwrap()
            .is_empty()
    );
    let history = ledger
        .transaction_history(&HistoryFilter::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].value, dec!(-6));
    assert!(ledger.reconcile().await.unwrap().is_empty());

    let err = consume(&ledger, 1, 1).await.unwrap_err();
    assert!(matches!(err, LedgerError::UnknownStockLocation(_)));
}

#[tokio::test]
async fn balance_is_a_pure_point_in_time_query() {
    let ledger = ledger();
    let jan = Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap();
    let feb = Utc.with_ymd_and_hms(2024, 2, 10, 9, 0, 0).unwrap();
    let mar = Utc.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap();

    ledger
        .adjust(
            &Adjustment::receive(key(1), 10, dec!(2))
                .with_defaults(defaults(dec!(2)))
                .with_metadata(EntryMetadata::new("opening").at(jan)),
        )
        .await
        .unwrap();
    ledger
        .adjust(&Adjustment::consume(key(1), 4).with_metadata(EntryMetadata::new("job").at(feb)))
        .await
        .unwrap();
    ledger
        .adjust(
            &Adjustment::receive(key(1), 5, dec!(3))
                .with_metadata(EntryMetadata::new("restock").at(mar)),
        )
        .await
        .unwrap();

    let first = ledger.balance_as_of(&BalanceFilter::as_of(feb)).await.unwrap();
    let second = ledger.balance_as_of(&BalanceFilter::as_of(feb)).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first[0].quantity, 6);
    assert_eq!(first[0].value, dec!(12));

    let on_day = ledger
        .balance_as_of(&BalanceFilter::on(chrono::NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()))
        .await
        .unwrap();
    assert_eq!(on_day[0].quantity, 11);
    assert_eq!(on_day[0].value, dec!(27));

    let february = ledger
        .transaction_history(&HistoryFilter {
            date_from: chrono::NaiveDate::from_ymd_opt(2024, 2, 1),
            date_to: chrono::NaiveDate::from_ymd_opt(2024, 2, 29),
            ..HistoryFilter::default()
        })
        .await
        .unwrap();
    assert_eq!(february.len(), 1);
    assert_eq!(february[0].quantity_change, -4);
}

#[tokio::test]
async fn balance_honours_customer_and_category_filters() {
    let ledger = ledger();
    receive(&ledger, 1, 10, dec!(2)).await;

    let card = |customer_id: i64, category: &str| StockDefaults {
        customer_id,
        category: category.to_string(),
        description: "100lb cover".to_string(),
        ..defaults(dec!(5))
    };
    ledger
        .adjust(
            &Adjustment::receive(StockKey::new("CARD-1", 1, Ownership::Customer), 4, dec!(5))
                .with_defaults(card(8, "Card")),
        )
        .await
        .unwrap();
    ledger
        .adjust(
            &Adjustment::receive(StockKey::new("CARD-7", 1, Ownership::House), 3, dec!(5))
                .with_defaults(card(7, "Card")),
        )
        .await
        .unwrap();

    let now = Utc::now();
    let everything = ledger.balance_as_of(&BalanceFilter::as_of(now)).await.unwrap();
    assert_eq!(everything.len(), 3);

    let envelopes = ledger
        .balance_as_of(&BalanceFilter::as_of(now).for_customer(7).in_category("Envelope"))
        .await
        .unwrap();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].stock_id, "ENV-10");
    assert_eq!(envelopes[0].value, dec!(20));

    let other_customer = ledger
        .balance_as_of(&BalanceFilter::as_of(now).for_customer(8))
        .await
        .unwrap();
    let ids: Vec<_> = other_customer.iter().map(|row| row.stock_id.as_str()).collect();
    assert_eq!(ids, vec!["CARD-1"]);

    let cards = ledger
        .balance_as_of(&BalanceFilter::as_of(now).in_category("Card"))
        .await
        .unwrap();
    let ids: Vec<_> = cards.iter().map(|row| row.stock_id.as_str()).collect();
    assert_eq!(ids, vec!["CARD-1", "CARD-7"]);
}

#[tokio::test]
async fn merged_lot_leaves_earlier_balances() {
    let ledger = ledger();
    let day = |d: u32| Utc.with_ymd_and_hms(2024, 1, d, 9, 0, 0).unwrap();
    let date = |d: u32| chrono::NaiveDate::from_ymd_opt(2024, 1, d).unwrap();

    ledger
        .adjust(
            &Adjustment::receive(key(1), 10, dec!(1))
                .with_defaults(defaults(dec!(1)))
                .with_metadata(EntryMetadata::new("opening").at(day(1))),
        )
        .await
        .unwrap();
    ledger
        .adjust(&Adjustment::consume(key(1), 4).with_metadata(EntryMetadata::new("job").at(day(2))))
        .await
        .unwrap();
    ledger
        .adjust(
            &Adjustment::receive(key(1), 5, dec!(1))
                .with_metadata(EntryMetadata::new("restock").at(day(3))),
        )
        .await
        .unwrap();

    // The receipt lot now carries the restock timestamp.
    let entries = all_entries(&ledger).await;
    assert_eq!(entries[0].quantity_change, 15);
    assert_eq!(entries[0].recorded_at, day(3));

    let before_merge = ledger.balance_as_of(&BalanceFilter::on(date(2))).await.unwrap();
    assert_eq!(before_merge[0].quantity, -4);
    assert_eq!(before_merge[0].value, dec!(-4));

    let after_merge = ledger.balance_as_of(&BalanceFilter::on(date(3))).await.unwrap();
    assert_eq!(after_merge[0].quantity, 11);
    assert_eq!(after_merge[0].value, dec!(11));

    let records = ledger.stock_on_hand(&StockQuery::default()).await.unwrap();
    assert_eq!(records[0].record.quantity, 11);
    assert!(ledger.reconcile().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_failure_during_transfer_changes_nothing() {
    let store = InMemoryLedgerStore::new();
    let ledger = InventoryLedger::new(store.clone());
    receive(&ledger, 1, 5, dec!(1)).await;
    receive(&ledger, 1, 5, dec!(2)).await;
    let entries_before = all_entries(&ledger).await;
    let stock_before = ledger.stock_on_hand(&StockQuery::default()).await.unwrap();

    // Fails on the second lot update, after the source has been partly written.
    store.fail_writes_after(3);
    let err = ledger.transfer(&transfer_request(7)).await.unwrap_err();
    assert!(matches!(err, LedgerError::StoreFailure(_)));
    store.clear_write_failures();

    assert_eq!(all_entries(&ledger).await, entries_before);
    assert_eq!(
        ledger.stock_on_hand(&StockQuery::default()).await.unwrap(),
        stock_before
    );

    let moved = ledger.transfer(&transfer_request(7)).await.unwrap();
    assert_eq!(moved.destination.quantity, 7);
}

#[tokio::test]
async fn reconciliation_flags_nothing_after_mixed_operations() {
    let ledger = ledger();
    receive(&ledger, 1, 8, dec!(1)).await;
    receive(&ledger, 1, 4, dec!(1.25)).await;
    consume(&ledger, 1, 9).await.unwrap();
    ledger.transfer(&transfer_request(2)).await.unwrap();
    receive(&ledger, 2, 1, dec!(1.25)).await;
    consume(&ledger, 2, 3).await.unwrap();

    assert!(ledger.reconcile().await.unwrap().is_empty());
    let on_hand = ledger.stock_on_hand(&StockQuery::default()).await.unwrap();
    assert_eq!(on_hand.len(), 1);
    assert_eq!(on_hand[0].record.quantity, 1);
    assert!(on_hand[0].below_minimum);
}
