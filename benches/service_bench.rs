//! Criterion benchmarks for hot paths in the trackd service.
//!
//! Run with:
//!   cargo bench
//!
//! Covers:
//!   - PATCH body parsing (field extraction + change-set construction)
//!   - Item-update permission checks (field allow-list)
//!   - Progress aggregation arithmetic

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::Value;
use trackd::tasks::model::{body_fields, progress_percentage, round2, ItemChanges, TaskChanges};
use trackd::tasks::policy::{check_item_update, ItemAccess, EXECUTOR_ALLOWED_FIELDS};

// ─── PATCH body parsing ──────────────────────────────────────────────────────

static TASK_PATCH: &str = r#"{
    "title": "Quarterly report",
    "description": "Numbers for Q3, updated scope",
    "status": "in_progress",
    "source_links": ["https://example.com/brief", "https://example.com/data"],
    "result_link": null,
    "planned_start_date": "2026-09-01",
    "planned_end_date": "2026-09-30"
}"#;

static ITEM_PATCH_STATUS_ONLY: &str = r#"{ "status": "completed" }"#;

fn bench_change_parsing(c: &mut Criterion) {
    let task_body: Value = serde_json::from_str(TASK_PATCH).unwrap();
    let item_body: Value = serde_json::from_str(ITEM_PATCH_STATUS_ONLY).unwrap();

    c.bench_function("parse_task_patch_body", |b| {
        b.iter(|| {
            let v: Value = serde_json::from_str(black_box(TASK_PATCH)).unwrap();
            black_box(v);
        });
    });

    c.bench_function("task_changes_from_json", |b| {
        b.iter(|| {
            let changes = TaskChanges::from_json(black_box(&task_body)).unwrap();
            black_box(changes);
        });
    });

    c.bench_function("item_changes_from_json", |b| {
        b.iter(|| {
            let changes = ItemChanges::from_json(black_box(&item_body)).unwrap();
            black_box(changes);
        });
    });

    c.bench_function("body_fields_extraction", |b| {
        b.iter(|| {
            let fields = body_fields(black_box(&task_body));
            black_box(fields);
        });
    });
}

// ─── Permission checks ───────────────────────────────────────────────────────
//
// The allow-list check runs on every item PATCH before the store is touched.

fn bench_permission_checks(c: &mut Criterion) {
    let status_only: Vec<String> = vec!["status".to_string()];
    let mixed: Vec<String> = vec![
        "status".to_string(),
        "title".to_string(),
        "planned_hours".to_string(),
    ];

    c.bench_function("executor_check_status_only", |b| {
        b.iter(|| {
            let r = check_item_update(ItemAccess::Executor, black_box(&status_only));
            black_box(r.is_ok());
        });
    });

    c.bench_function("executor_check_mixed_fields", |b| {
        b.iter(|| {
            let r = check_item_update(ItemAccess::Executor, black_box(&mixed));
            black_box(r.is_err());
        });
    });

    c.bench_function("assigner_check_mixed_fields", |b| {
        b.iter(|| {
            let r = check_item_update(ItemAccess::Assigner, black_box(&mixed));
            black_box(r.is_ok());
        });
    });

    c.bench_function("allow_list_lookup", |b| {
        b.iter(|| {
            black_box(EXECUTOR_ALLOWED_FIELDS.contains(black_box(&"status")));
        });
    });
}

// ─── Progress arithmetic ─────────────────────────────────────────────────────
//
// Summary rows compute a rounded completion percentage per task; list
// endpoints do this once per returned row.

fn bench_progress(c: &mut Criterion) {
    let counts: Vec<(i64, i64)> = (0..200).map(|i| (i % 17, 16 + i % 5)).collect();

    c.bench_function("progress_single", |b| {
        b.iter(|| {
            black_box(progress_percentage(black_box(2), black_box(3)));
        });
    });

    c.bench_function("progress_200_rows", |b| {
        b.iter(|| {
            let total: f64 = counts
                .iter()
                .map(|(done, total)| progress_percentage(*done, *total))
                .sum();
            black_box(total);
        });
    });

    c.bench_function("round2_hours", |b| {
        b.iter(|| {
            black_box(round2(black_box(2.675)));
        });
    });
}

// ─── Entry point ─────────────────────────────────────────────────────────────

criterion_group!(
    benches,
    bench_change_parsing,
    bench_permission_checks,
    bench_progress
);
criterion_main!(benches);
