//! End-to-end tests through the ledger service.
//!
//! Request -> dispatcher -> event store -> bus/read models -> forecast.

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use manuerp_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
    use manuerp_forecast::{ForecastMethod, ForecastStatus};
    use serde_json::Value as JsonValue;
    use manuerp_inventory::{
        Direction, InventoryItemId, MovementType, NegativeStockPolicy, StockLevels, StockStatus,
        SupplierId,
    };

    use crate::config::LedgerConfig;
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::forecast_store::InMemoryForecastStore;
    use crate::ledger::{
        ForecastOptions, InMemoryStockLedger, LedgerError, MovementRequest, NewItem, StockLedger,
    };
    use crate::projections::DateRange;
    use crate::suppliers::InMemorySupplierDirectory;

    fn ledger() -> InMemoryStockLedger {
        manuerp_observability::init();
        StockLedger::in_memory(LedgerConfig::default())
    }

    fn bus() -> InMemoryEventBus<EventEnvelope<JsonValue>> {
        InMemoryEventBus::new()
    }

    fn as_of() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn levels(min: u64, reorder: u64, max: u64) -> StockLevels {
        StockLevels::new(min, reorder, max)
    }

    fn item_with_stock(
        ledger: &InMemoryStockLedger,
        part_number: &str,
        stock: u64,
        levels: StockLevels,
    ) -> InventoryItemId {
        ledger
            .create_item(
                NewItem::new(part_number, "Aluminium 6061", "pcs", levels)
                    .with_initial_stock(stock, 250)
                    .at(as_of() - Duration::days(400)),
            )
            .unwrap()
            .item_id
    }

    fn issue(item_id: InventoryItemId, quantity: u64) -> MovementRequest {
        MovementRequest::new(item_id, MovementType::Out, quantity, "issued to work order")
    }

    #[test]
    fn inbound_and_outbound_move_stock_and_status_together() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "AL-100", 50, levels(5, 20, 100));
        assert_eq!(ledger.item(item_id).unwrap().status, StockStatus::InStock);

        let receipt = ledger.record_movement(issue(item_id, 30)).unwrap();
        assert_eq!(receipt.movement.previous_stock, 50);
        assert_eq!(receipt.movement.new_stock, 20);
        assert_eq!(receipt.previous_status, StockStatus::InStock);
        assert_eq!(receipt.status, StockStatus::LowStock);
        assert!(receipt.status_changed());
        assert!(receipt.warnings.is_empty());
        assert_eq!(receipt.attempts, 1);

        let receipt = ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::In, 85, "PO-7781 received")
                    .with_unit_cost(250),
            )
            .unwrap();
        assert_eq!(receipt.movement.new_stock, 105);
        assert_eq!(receipt.status, StockStatus::Overstock);

        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.current_stock, 105);
        assert_eq!(item.status, StockStatus::Overstock);
        assert_eq!(item.movement_count, 3);
        assert_eq!(ledger.items_needing_reorder().len(), 0);
    }

    #[test]
    fn stock_at_reorder_point_is_low_stock() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "BR-20", 20, levels(5, 20, 100));

        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.current_stock, 20);
        assert_eq!(item.status, StockStatus::LowStock);
        assert_eq!(ledger.items_needing_reorder(), vec![item]);
    }

    #[test]
    fn reject_policy_leaves_stock_untouched() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "ST-3", 3, levels(1, 2, 10));

        let err = ledger.record_movement(issue(item_id, 5)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientStock {
                available: 3,
                requested: 5
            }
        ));
        assert_eq!(err.http_status(), 409);

        assert_eq!(ledger.item(item_id).unwrap().current_stock, 3);
        assert_eq!(ledger.movements(item_id).len(), 1);
        assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), 3);
    }

    #[test]
    fn clamp_policy_applies_what_is_available_and_warns() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "ST-4", 3, levels(1, 2, 10));

        let receipt = ledger
            .record_movement(issue(item_id, 5).with_policy(NegativeStockPolicy::ClampToZero))
            .unwrap();
        assert!(receipt.movement.clamped);
        assert_eq!(receipt.movement.requested_quantity, 5);
        assert_eq!(receipt.movement.quantity, 3);
        assert_eq!(receipt.movement.new_stock, 0);
        assert_eq!(receipt.status, StockStatus::OutOfStock);
        assert_eq!(receipt.warnings.len(), 1);

        // Nothing left to clamp.
        let err = ledger
            .record_movement(issue(item_id, 1).with_policy(NegativeStockPolicy::ClampToZero))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientStock { available: 0, .. }));
    }

    #[test]
    fn configured_policy_applies_when_request_has_none() {
        manuerp_observability::init();
        let config = LedgerConfig::from_lookup(|var| {
            (var == crate::config::ENV_NEGATIVE_STOCK_POLICY).then(|| "clamp".to_string())
        })
        .unwrap();
        let ledger = StockLedger::in_memory(config);
        let item_id = item_with_stock(&ledger, "ST-5", 2, levels(1, 2, 10));

        let receipt = ledger.record_movement(issue(item_id, 4)).unwrap();
        assert!(receipt.movement.clamped);
        assert_eq!(ledger.item(item_id).unwrap().current_stock, 0);
    }

    #[test]
    fn invalid_requests_are_validation_errors() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "V-1", 10, levels(1, 2, 10));

        let zero = ledger.record_movement(issue(item_id, 0)).unwrap_err();
        assert!(matches!(zero, LedgerError::Validation(_)));
        assert_eq!(zero.http_status(), 400);

        let blank = ledger
            .record_movement(MovementRequest::new(item_id, MovementType::Out, 1, "  "))
            .unwrap_err();
        assert!(matches!(blank, LedgerError::Validation(_)));

        let undirected = ledger
            .record_movement(MovementRequest::new(item_id, MovementType::Adjustment, 1, "count"))
            .unwrap_err();
        assert!(matches!(undirected, LedgerError::Validation(_)));

        let malformed: LedgerError = "teleport".parse::<MovementType>().unwrap_err().into();
        assert!(matches!(malformed, LedgerError::Validation(_)));

        let bad_levels = ledger
            .create_item(NewItem::new("V-2", "Steel", "kg", levels(1, 50, 40)))
            .unwrap_err();
        assert!(matches!(bad_levels, LedgerError::Validation(_)));

        assert_eq!(ledger.movements(item_id).len(), 1);
        assert_eq!(ledger.item(item_id).unwrap().current_stock, 10);
    }

    #[test]
    fn unknown_and_deactivated_items_are_not_found() {
        let ledger = ledger();
        let missing = ledger
            .record_movement(issue(InventoryItemId::generate(), 1))
            .unwrap_err();
        assert!(matches!(missing, LedgerError::NotFound(_)));
        assert_eq!(missing.http_status(), 404);

        let item_id = item_with_stock(&ledger, "OLD-1", 10, levels(1, 2, 10));
        ledger.deactivate_item(item_id).unwrap();
        assert!(!ledger.item(item_id).unwrap().is_active);

        let err = ledger.record_movement(issue(item_id, 1)).unwrap_err();
        assert!(matches!(err, LedgerError::NotFound(_)));
        assert!(matches!(
            ledger.recalculate_forecast_at(item_id, ForecastOptions::default(), as_of()),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn part_numbers_are_unique_ignoring_case() {
        let ledger = ledger();
        let first = item_with_stock(&ledger, "PN-001", 0, levels(0, 5, 50));

        let err = ledger
            .create_item(NewItem::new(" pn-001 ", "Copper", "m", levels(0, 5, 50)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Conflict(_)));
        assert_eq!(err.http_status(), 409);

        // Deactivated items keep their number.
        ledger.deactivate_item(first).unwrap();
        assert!(ledger
            .create_item(NewItem::new("PN-001", "Copper", "m", levels(0, 5, 50)))
            .is_err());

        assert_eq!(ledger.item_by_part_number("pn-001").unwrap().item_id, first);
        assert_eq!(ledger.items().len(), 1);
    }

    #[test]
    fn concurrent_outbound_movements_lose_no_updates() {
        const N: u64 = 400;
        let ledger = Arc::new(ledger());
        let item_id = item_with_stock(&ledger, "CC-400", N, levels(0, 4, 1000));
        let start = Arc::new(Barrier::new(N as usize));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    ledger.record_movement(issue(item_id, 1))
                })
            })
            .collect();
        for h in handles {
            let receipt = h.join().unwrap().unwrap();
            // Same-item writes queue up instead of racing the version check.
            assert_eq!(receipt.attempts, 1);
        }

        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.current_stock, 0);
        assert_eq!(item.status, StockStatus::OutOfStock);

        let outbound: Vec<_> = ledger
            .movements(item_id)
            .into_iter()
            .filter(|e| e.movement.movement_type == MovementType::Out)
            .collect();
        assert_eq!(outbound.len() as u64, N);

        // Every snapshot chains onto the previous one.
        let mut previous = N;
        for entry in &outbound {
            assert_eq!(entry.movement.previous_stock, previous);
            previous = entry.movement.new_stock;
        }
        assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), 0);
    }

    #[test]
    fn ledger_reconstructs_current_stock() {
        let ledger = ledger();
        let initial = 40;
        let item_id = item_with_stock(&ledger, "RC-1", initial, levels(5, 10, 200));

        ledger.record_movement(issue(item_id, 12)).unwrap();
        ledger
            .record_movement(MovementRequest::new(item_id, MovementType::In, 30, "restock"))
            .unwrap();
        ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::Adjustment, 3, "cycle count")
                    .with_direction(Direction::Outbound),
            )
            .unwrap();
        ledger
            .record_movement(MovementRequest::new(item_id, MovementType::Scrap, 5, "damaged"))
            .unwrap();

        let current = ledger.item(item_id).unwrap().current_stock;
        assert_eq!(current, 50);
        assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), current);

        let after_initial: i128 = ledger
            .movements(item_id)
            .iter()
            .filter(|e| e.movement.movement_type != MovementType::Initial)
            .map(|e| e.movement.signed_quantity())
            .sum();
        assert_eq!(after_initial, i128::from(current) - i128::from(initial));
    }

    #[test]
    fn reversal_compensates_and_cannot_repeat() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "RV-1", 10, levels(1, 2, 100));

        let received = ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::In, 20, "wrong delivery")
                    .with_unit_cost(400),
            )
            .unwrap();
        let original = received.movement.movement_id;
        assert_eq!(ledger.item(item_id).unwrap().current_stock, 30);

        let reversal = ledger
            .reverse_movement(item_id, original, "booked against wrong item", None)
            .unwrap();
        assert_eq!(reversal.movement.movement_type, MovementType::Adjustment);
        assert_eq!(reversal.movement.direction, Direction::Outbound);
        assert_eq!(reversal.movement.quantity, 20);
        assert_eq!(reversal.movement.reversal_of, Some(original));
        assert_eq!(ledger.item(item_id).unwrap().current_stock, 10);

        let entry = ledger
            .movements(item_id)
            .into_iter()
            .find(|e| e.movement.movement_id == original)
            .unwrap();
        assert!(entry.is_reversed);
        assert_eq!(entry.reversal_reference, Some(reversal.movement.movement_id));

        let again = ledger.reverse_movement(item_id, original, "again", None).unwrap_err();
        assert!(matches!(again, LedgerError::Conflict(_)));

        let of_reversal = ledger
            .reverse_movement(item_id, reversal.movement.movement_id, "undo undo", None)
            .unwrap_err();
        assert!(matches!(of_reversal, LedgerError::Validation(_)));

        assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), 10);
    }

    #[test]
    fn receipts_feed_the_weighted_average_cost() {
        let ledger = ledger();
        let item_id = ledger
            .create_item(
                NewItem::new("WA-1", "Brass", "pcs", levels(0, 5, 100)).with_initial_stock(10, 100),
            )
            .unwrap()
            .item_id;

        ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::In, 10, "PO-1").with_unit_cost(200),
            )
            .unwrap();
        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.average_cost, 150);
        assert_eq!(item.stock_value(), 20 * 150);

        // Issues are valued at average cost and leave it unchanged.
        let out = ledger.record_movement(issue(item_id, 4)).unwrap();
        assert_eq!(out.movement.unit_cost, 150);
        assert_eq!(ledger.item(item_id).unwrap().average_cost, 150);
    }

    #[test]
    fn stock_level_updates_rederive_status() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "SL-1", 30, levels(5, 10, 100));
        assert_eq!(ledger.item(item_id).unwrap().status, StockStatus::InStock);

        let item = ledger.update_stock_levels(item_id, levels(5, 30, 100)).unwrap();
        assert_eq!(item.status, StockStatus::LowStock);

        let item = ledger.update_stock_levels(item_id, levels(5, 10, 30)).unwrap();
        assert_eq!(item.status, StockStatus::Overstock);

        let err = ledger.update_stock_levels(item_id, levels(50, 10, 30)).unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
    }

    #[test]
    fn summary_groups_movements_by_type_within_range() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "SM-1", 100, levels(5, 10, 500));
        let t = as_of();

        ledger.record_movement(issue(item_id, 10).at(t - Duration::days(10))).unwrap();
        ledger.record_movement(issue(item_id, 5).at(t - Duration::days(5))).unwrap();
        ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::Return, 2, "unused")
                    .at(t - Duration::days(3)),
            )
            .unwrap();
        ledger.record_movement(issue(item_id, 50).at(t + Duration::days(3))).unwrap();

        let summary = ledger
            .movement_summary(item_id, DateRange::new(t - Duration::days(30), t))
            .unwrap();
        assert_eq!(summary.totals_for(MovementType::Out).count, 2);
        assert_eq!(summary.totals_for(MovementType::Out).quantity, 15);
        assert_eq!(summary.totals_for(MovementType::Return).quantity, 2);
        assert_eq!(summary.outbound, 15);
        assert_eq!(summary.inbound, 2);
        assert_eq!(summary.net_change, -13);

        let window = ledger.movements_between(item_id, DateRange::new(t - Duration::days(30), t));
        assert_eq!(window.len(), 3);
        assert!(window.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number));

        let inverted = ledger.movement_summary(item_id, DateRange::new(t, t - Duration::days(1)));
        assert!(matches!(inverted, Err(LedgerError::Validation(_))));
        assert!(matches!(
            ledger.movement_summary(InventoryItemId::generate(), DateRange::new(t, t)),
            Err(LedgerError::NotFound(_))
        ));
    }

    #[test]
    fn forecast_without_usage_history_has_no_stock_out_date() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "FC-0", 80, levels(5, 10, 100));

        let forecast = ledger
            .recalculate_forecast_at(item_id, ForecastOptions::default(), as_of())
            .unwrap();
        assert_eq!(forecast.methodology, ForecastMethod::InsufficientData);
        assert_eq!(forecast.confidence, 0);
        assert!(forecast.predicted_stock_out_date.is_none());
        assert!(forecast.recommended_order_date.is_none());
        assert_eq!(forecast.status, ForecastStatus::Active);
    }

    #[test]
    fn new_forecast_supersedes_and_scores_the_previous_one() {
        let ledger = ledger();
        let item_id = item_with_stock(&ledger, "FC-1", 600, levels(20, 60, 600));
        let t = as_of();

        for month in 1..=6 {
            ledger
                .record_movement(issue(item_id, 30).at(t - Duration::days(30 * month)))
                .unwrap();
        }
        let first = ledger
            .recalculate_forecast_at(item_id, ForecastOptions::default(), t)
            .unwrap();
        assert_eq!(first.methodology, ForecastMethod::MovingAverage);
        assert!(first.predicted_stock_out_date.is_some());
        assert!(first.confidence > 0);

        let later = t + Duration::days(30);
        ledger.record_movement(issue(item_id, 60).at(t + Duration::days(10))).unwrap();
        let second = ledger
            .recalculate_forecast_at(
                item_id,
                ForecastOptions {
                    seasonal_factor: 1.2,
                    ..ForecastOptions::default()
                },
                later,
            )
            .unwrap();
        assert_eq!(second.methodology, ForecastMethod::SeasonalAdjusted);

        let history = ledger.forecast_history(item_id).unwrap();
        assert_eq!(history.len(), 2);
        let old = &history[0];
        assert_eq!(old.id, first.id);
        assert_eq!(old.status, ForecastStatus::Superseded);
        assert_eq!(old.superseded_by, Some(second.id));
        let accuracy = old.accuracy.unwrap();
        assert!(accuracy.mape.is_finite() && accuracy.mape >= 0.0);
        // 60 units used in the month after a ~30/month forecast.
        assert!(accuracy.bias < 0.0);

        assert_eq!(ledger.active_forecast(item_id).unwrap().unwrap().id, second.id);
    }

    #[test]
    fn actionable_items_are_those_ordering_soon() {
        manuerp_observability::init();
        let suppliers = InMemorySupplierDirectory::new();
        let supplier = SupplierId::new();
        suppliers.register(supplier, 14);
        let ledger = StockLedger::in_memory(LedgerConfig::default()).with_suppliers(suppliers);
        let t = as_of();

        let urgent = ledger
            .create_item(
                NewItem::new("UR-1", "Titanium", "pcs", levels(5, 10, 100))
                    .with_initial_stock(40, 900)
                    .with_supplier(supplier)
                    .at(t - Duration::days(60)),
            )
            .unwrap()
            .item_id;
        ledger.record_movement(issue(urgent, 30).at(t - Duration::days(20))).unwrap();

        let relaxed = item_with_stock(&ledger, "RX-1", 1000, levels(5, 10, 2000));
        ledger.record_movement(issue(relaxed, 10).at(t - Duration::days(20))).unwrap();

        let urgent_forecast = ledger
            .recalculate_forecast_at(urgent, ForecastOptions::default(), t)
            .unwrap();
        assert_eq!(urgent_forecast.lead_time_days, 14);
        ledger
            .recalculate_forecast_at(relaxed, ForecastOptions::default(), t)
            .unwrap();

        let actionable = ledger.find_actionable_at(t, 7).unwrap();
        assert_eq!(actionable.len(), 1);
        assert_eq!(actionable[0].item.item_id, urgent);
        assert!(actionable[0].days_until_order <= 0);
        assert!(actionable[0].forecast.recommended_order_quantity > 0);

        // Past validity, forecasts stop being actionable and get expired.
        let much_later = t + Duration::days(200);
        assert!(ledger.find_actionable_at(much_later, 7).unwrap().is_empty());
        assert_eq!(ledger.expire_forecasts(much_later).unwrap().len(), 2);
        assert!(ledger.active_forecast(urgent).unwrap().is_none());
    }

    #[test]
    fn ledger_can_be_configured_from_the_environment() {
        manuerp_observability::init();
        let ledger =
            InMemoryStockLedger::from_env(InMemoryEventStore::new(), InMemoryEventBus::new()).unwrap();
        assert!(ledger.config().max_concurrency_retries > 0);
        assert!(ledger.config().forecast_lookback_months > 0);
    }

    #[test]
    fn committed_events_are_published_in_order() {
        let ledger = ledger();
        let sub = ledger.subscribe();

        let item_id = item_with_stock(&ledger, "BUS-1", 5, levels(1, 2, 10));
        ledger.record_movement(issue(item_id, 2)).unwrap();

        let published = sub.drain();
        let types: Vec<_> = published.iter().map(|e| e.event_type().to_string()).collect();
        assert_eq!(
            types,
            vec![
                "inventory.item.created",
                "inventory.movement.recorded",
                "inventory.movement.recorded",
            ]
        );
        let seqs: Vec<_> = published.iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert!(published.iter().all(|e| e.aggregate_id() == item_id.0));
    }

    #[test]
    fn read_models_rebuild_from_the_event_store() {
        let ledger = ledger();
        let a = item_with_stock(&ledger, "RB-1", 10, levels(1, 2, 50));
        let b = item_with_stock(&ledger, "RB-2", 20, levels(1, 2, 50));
        ledger.record_movement(issue(a, 4)).unwrap();
        ledger.record_movement(issue(b, 7)).unwrap();

        let before = ledger.items();
        let movements_before = ledger.movements(a);

        let envelopes: Vec<_> = ledger
            .store()
            .load_all()
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();
        ledger.rebuild_read_models(envelopes).unwrap();

        assert_eq!(ledger.items(), before);
        assert_eq!(ledger.movements(a), movements_before);
        assert!(matches!(
            ledger.create_item(NewItem::new("rb-2", "Zinc", "kg", levels(1, 2, 50))),
            Err(LedgerError::Conflict(_))
        ));
    }

    #[test]
    fn restored_ledger_picks_up_existing_history() {
        manuerp_observability::init();
        let store = Arc::new(InMemoryEventStore::new());
        let forecasts = Arc::new(InMemoryForecastStore::new());
        let t = as_of();

        let (item_id, forecast_id) = {
            let ledger = StockLedger::new(Arc::clone(&store), bus(), LedgerConfig::default())
                .with_forecast_store(Arc::clone(&forecasts));
            let item_id = ledger
                .create_item(
                    NewItem::new("PN-R1", "Brass", "pcs", levels(5, 20, 200))
                        .with_initial_stock(120, 300)
                        .at(t - Duration::days(200)),
                )
                .unwrap()
                .item_id;
            for month in 1..=4 {
                ledger
                    .record_movement(issue(item_id, 15).at(t - Duration::days(30 * month)))
                    .unwrap();
            }
            let forecast = ledger
                .recalculate_forecast_at(item_id, ForecastOptions::default(), t)
                .unwrap();
            (item_id, forecast.id)
        };

        let ledger = StockLedger::restore(Arc::clone(&store), bus(), LedgerConfig::default())
            .unwrap()
            .with_forecast_store(Arc::clone(&forecasts));

        let item = ledger.item(item_id).unwrap();
        assert_eq!(item.current_stock, 60);
        assert_eq!(ledger.movements(item_id).len(), 5);
        assert_eq!(ledger.item_by_part_number("pn-r1").unwrap().item_id, item_id);
        assert!(matches!(
            ledger.create_item(NewItem::new(" pn-r1 ", "Brass", "pcs", levels(5, 20, 200))),
            Err(LedgerError::Conflict(_))
        ));

        // Writes continue from where the stream left off.
        let receipt = ledger.record_movement(issue(item_id, 10)).unwrap();
        assert_eq!(receipt.movement.previous_stock, 60);
        assert_eq!(ledger.item(item_id).unwrap().current_stock, 50);
        assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), 50);

        assert_eq!(ledger.active_forecast(item_id).unwrap().unwrap().id, forecast_id);
        ledger
            .recalculate_forecast_at(item_id, ForecastOptions::default(), t + Duration::days(7))
            .unwrap();
        let history = ledger.forecast_history(item_id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, ForecastStatus::Superseded);
        assert!(history[0].accuracy.is_some());
    }

    /// Bus whose every publish fails.
    struct ClosedBus;

    impl EventBus<EventEnvelope<JsonValue>> for ClosedBus {
        type Error = String;

        fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            Err("bus closed".to_string())
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            let (_tx, rx) = mpsc::channel();
            Subscription::new(rx)
        }
    }

    #[test]
    fn part_number_stays_reserved_when_publishing_fails() {
        manuerp_observability::init();
        let ledger = StockLedger::new(InMemoryEventStore::new(), ClosedBus, LedgerConfig::default());

        let err = ledger
            .create_item(NewItem::new("PUB-1", "Nickel", "kg", levels(1, 2, 10)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Publish(_)));

        // Stored despite the failed publish, and visible to readers.
        let item = ledger.item_by_part_number("pub-1").unwrap();
        assert_eq!(ledger.store().load_stream(item.item_id.0).unwrap().len(), 1);

        assert!(matches!(
            ledger.create_item(NewItem::new("PUB-1", "Nickel", "kg", levels(1, 2, 10))),
            Err(LedgerError::Conflict(_))
        ));
        assert_eq!(ledger.items().len(), 1);
    }
}

#[cfg(test)]
mod properties {
    use proptest::prelude::*;

    use manuerp_inventory::{Direction, MovementType, NegativeStockPolicy, StockLevels};

    use crate::config::LedgerConfig;
    use crate::ledger::{LedgerError, MovementRequest, NewItem, StockLedger};

    fn movement() -> impl Strategy<Value = (MovementType, Direction, u64)> {
        (
            prop::sample::select(vec![
                MovementType::In,
                MovementType::Out,
                MovementType::Transfer,
                MovementType::Adjustment,
                MovementType::Return,
                MovementType::Scrap,
            ]),
            prop::bool::ANY,
            1u64..60,
        )
            .prop_map(|(t, inbound, qty)| {
                let direction = if inbound { Direction::Inbound } else { Direction::Outbound };
                (t, direction, qty)
            })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn ledger_always_reconstructs_current_stock(
            initial in 0u64..100,
            clamp in prop::bool::ANY,
            moves in prop::collection::vec(movement(), 1..25),
        ) {
            let ledger = StockLedger::in_memory(LedgerConfig::default());
            let item_id = ledger
                .create_item(
                    NewItem::new("PROP-1", "Nylon", "pcs", StockLevels::new(0, 10, 100))
                        .with_initial_stock(initial, 10),
                )
                .unwrap()
                .item_id;
            let policy = if clamp { NegativeStockPolicy::ClampToZero } else { NegativeStockPolicy::Reject };

            for (movement_type, direction, qty) in moves {
                let mut request = MovementRequest::new(item_id, movement_type, qty, "property")
                    .with_policy(policy);
                if movement_type == MovementType::Adjustment {
                    request = request.with_direction(direction);
                }
                match ledger.record_movement(request) {
                    Ok(receipt) => prop_assert!(receipt.movement.is_consistent()),
                    Err(LedgerError::InsufficientStock { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected error: {other}"),
                }
            }

            let item = ledger.item(item_id).unwrap();
            prop_assert_eq!(ledger.reconstruct_stock(item_id).unwrap(), item.current_stock);
            prop_assert_eq!(
                item.status,
                StockLevels::new(0, 10, 100).status_for(item.current_stock)
            );

            let mut running = 0u64;
            for entry in ledger.movements(item_id) {
                prop_assert_eq!(entry.movement.previous_stock, running);
                running = entry.movement.new_stock;
            }
            prop_assert_eq!(running, item.current_stock);
        }
    }
}
