//! Benchmark suite for the todo file codec and validators.
//!
//! Covers:
//! - Document parsing and rendering (front-matter plus sections)
//! - Section schema validation
//! - Store listing over directories of various sizes
//!
//! # Running Benchmarks
//!
//! ```bash
//! cargo bench
//! cargo bench -- --save-baseline main
//! cargo bench -- --baseline main
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tempfile::TempDir;

use todo_mcp::todo::frontmatter::{parse_document, render_document};
use todo_mcp::todo::store::slugify;
use todo_mcp::todo::{ListFilter, Priority, SectionSchema, TodoStore, TodoType};
use todo_mcp::WorkingPaths;

// ============================================================================
// Codec Benchmarks
// ============================================================================

fn sample_document(items: usize) -> String {
    let checklist: String = (0..items)
        .map(|i| match i % 3 {
            0 => format!("- [x] Item {i}\n"),
            1 => format!("- [>] Item {i}\n"),
            _ => format!("- [ ] Item {i}\n"),
        })
        .collect();
    format!(
        "---\ntodo_id: bench-todo\nstarted: 2025-01-19 09:30:00\nstatus: in_progress\npriority: high\ntype: feature\n---\n\n\
         # Task: Bench todo\n\n## Findings & Research\n\nSome notes.\n\n## Checklist\n\n{checklist}\n## Test Results Log\n\n"
    )
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for items in [10, 100, 1000] {
        let doc = sample_document(items);
        group.throughput(Throughput::Bytes(doc.len() as u64));
        group.bench_with_input(BenchmarkId::new("parse", items), &doc, |b, doc| {
            b.iter(|| black_box(parse_document(black_box(doc))))
        });

        if let Ok((todo, body)) = parse_document(&doc) {
            group.bench_with_input(BenchmarkId::new("render", items), &(todo, body), |b, (todo, body)| {
                b.iter(|| black_box(render_document(black_box(todo), black_box(body))))
            });
        }
    }

    group.finish();
}

// ============================================================================
// Validation Benchmarks
// ============================================================================

fn bench_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("validation");

    let checklist: String = (0..500).map(|i| format!("- [ ] Step {i}\n")).collect();
    group.bench_function("checklist_500", |b| {
        b.iter(|| black_box(SectionSchema::Checklist.validate(black_box(&checklist))))
    });

    let cases = format!("Cases:\n```rust\n{}```\n", "assert!(true);\n".repeat(200));
    group.bench_function("test_cases", |b| {
        b.iter(|| black_box(SectionSchema::TestCases.validate(black_box(&cases))))
    });

    let now = chrono::Local::now();
    group.bench_function("slugify", |b| {
        b.iter(|| black_box(slugify(black_box("Phase 2: Implement the Über-fast JSON codec!"), now)))
    });

    group.finish();
}

// ============================================================================
// Store Benchmarks
// ============================================================================

fn populated_store(count: usize) -> (TempDir, TodoStore) {
    let dir = TempDir::new().expect("temp dir");
    let paths = WorkingPaths::from_root(dir.path());
    for p in paths.required_dirs() {
        std::fs::create_dir_all(p).expect("create dir");
    }
    let store = TodoStore::new(paths);
    for i in 0..count {
        store
            .create(&format!("Bench task {i}"), Priority::Medium, TodoType::Feature)
            .expect("create todo");
    }
    (dir, store)
}

fn bench_store_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("store_list");

    for count in [10, 100] {
        let (_dir, store) = populated_store(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("list_all", count), &store, |b, store| {
            b.iter(|| black_box(store.list(&ListFilter::default())))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_codec, bench_validation, bench_store_list);
criterion_main!(benches);
