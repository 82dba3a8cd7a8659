use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::{Duration, TimeZone, Utc};
use manuerp_forecast::{ForecastJob, UsageHistory, UsageSample};
use manuerp_infra::event_store::EventStore;
use manuerp_infra::{
    ForecastOptions, InMemoryStockLedger, LedgerConfig, MovementRequest, NewItem, StockLedger,
};
use manuerp_inventory::{InventoryItemId, MovementType, StockLevels};

fn ledger_with_item(initial_stock: u64) -> (InMemoryStockLedger, InventoryItemId) {
    let ledger = StockLedger::in_memory(LedgerConfig::default());
    let item = ledger
        .create_item(
            NewItem::new("BENCH-1", "Steel 304", "pcs", StockLevels::new(10, 50, 1 << 40))
                .with_initial_stock(initial_stock, 120),
        )
        .unwrap();
    (ledger, item.item_id)
}

fn bench_record_movement(c: &mut Criterion) {
    let mut group = c.benchmark_group("record_movement");

    // Every dispatch replays the stream, so latency grows with history.
    for history in [0u64, 100, 1000] {
        group.bench_with_input(
            BenchmarkId::new("outbound_after_history", history),
            &history,
            |b, &history| {
                let (ledger, item_id) = ledger_with_item(1 << 30);
                for _ in 0..history {
                    ledger
                        .record_movement(MovementRequest::new(item_id, MovementType::Out, 1, "warmup"))
                        .unwrap();
                }
                b.iter(|| {
                    ledger
                        .record_movement(MovementRequest::new(
                            item_id,
                            MovementType::Out,
                            black_box(1),
                            "bench issue",
                        ))
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_forecast_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("forecast_engine");
    let as_of = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    for samples in [12usize, 365, 5000] {
        group.throughput(Throughput::Elements(samples as u64));
        let history = UsageHistory {
            item_id: manuerp_core::AggregateId::new(),
            current_stock: 10_000,
            max_stock: 20_000,
            samples: (0..samples)
                .map(|i| UsageSample {
                    occurred_at: as_of - Duration::hours(i as i64 * 2),
                    quantity: (i % 7) as u64 + 1,
                })
                .collect(),
        };
        group.bench_with_input(BenchmarkId::new("run", samples), &history, |b, history| {
            b.iter(|| {
                ForecastJob::new(history.clone())
                    .with_lead_time_days(21)
                    .run(black_box(as_of))
                    .unwrap()
            });
        });
    }

    group.finish();
}

fn bench_recalculate_forecast(c: &mut Criterion) {
    let (ledger, item_id) = ledger_with_item(1_000_000);
    let now = Utc::now();
    for day in 0..365 {
        ledger
            .record_movement(
                MovementRequest::new(item_id, MovementType::Out, 25, "daily usage")
                    .at(now - Duration::days(day)),
            )
            .unwrap();
    }

    c.bench_function("recalculate_forecast_365_movements", |b| {
        b.iter(|| {
            ledger
                .recalculate_forecast(black_box(item_id), ForecastOptions::default())
                .unwrap()
        });
    });
}

fn bench_read_model_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_model_rebuild");

    for movements in [100u64, 1000, 10_000] {
        let (ledger, item_id) = ledger_with_item(movements * 2);
        for _ in 0..movements {
            ledger
                .record_movement(MovementRequest::new(item_id, MovementType::Out, 1, "issue"))
                .unwrap();
        }
        let envelopes: Vec<_> = ledger
            .store()
            .load_all()
            .unwrap()
            .iter()
            .map(|e| e.to_envelope())
            .collect();

        group.throughput(Throughput::Elements(envelopes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("from_envelopes", movements),
            &envelopes,
            |b, envelopes| {
                b.iter(|| ledger.rebuild_read_models(black_box(envelopes.clone())).unwrap());
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_record_movement,
    bench_forecast_engine,
    bench_recalculate_forecast,
    bench_read_model_rebuild
);
criterion_main!(benches);
