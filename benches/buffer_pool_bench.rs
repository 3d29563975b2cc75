use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::prelude::*;

use std::sync::Arc;
use altaidb::storage::buffer::BufferPoolManager;
use altaidb::storage::page::PageManager;

// Create temporary db for benchmarking
fn create_test_buffer_pool(pool_size: usize) -> Arc<BufferPoolManager> {
    let temp_file = tempfile::NamedTempFile::new().unwrap();
    let path = temp_file.path().to_str().unwrap().to_string();
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path).unwrap());

    // Keep the temp file alive
    std::mem::forget(temp_file);

    buffer_pool
}

fn generate_test_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i % 256) as u8).collect()
}

fn buffer_pool_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("BufferPool");

    for size in [16usize, 128, 1024].iter() {
        group.bench_with_input(BenchmarkId::new("sequential_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_manager = PageManager::new();

            let mut page_ids = Vec::new();
            for _ in 0..size {
                let (page, page_id) = buffer_pool.new_page().unwrap();
                {
                    let mut page_guard = page.write();
                    page_manager.init_page(&mut page_guard);
                    let data = generate_test_data(100);
                    page_manager.insert_record(&mut page_guard, &data).unwrap();
                }
                buffer_pool.unpin_page(page_id, true).unwrap();
                page_ids.push(page_id);
            }

            b.iter(|| {
                for &page_id in &page_ids {
                    let _page = buffer_pool.fetch_page(page_id).unwrap();
                    buffer_pool.unpin_page(page_id, false).unwrap();
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("random_access", size), size, |b, &size| {
            let buffer_pool = create_test_buffer_pool(size);
            let page_manager = PageManager::new();

            let mut page_ids = Vec::new();
            // Twice as many pages as frames, to make the replacer work.
            for _ in 0..size * 2 {
                let (page, page_id) = buffer_pool.new_page().unwrap();
                {
                    let mut page_guard = page.write();
                    page_manager.init_page(&mut page_guard);
                    let data = generate_test_data(100);
                    page_manager.insert_record(&mut page_guard, &data).unwrap();
                }
                buffer_pool.unpin_page(page_id, true).unwrap();
                page_ids.push(page_id);
            }

            let mut rng = StdRng::seed_from_u64(7);
            b.iter(|| {
                let page_id = *page_ids.choose(&mut rng).unwrap();
                let _page = buffer_pool.fetch_page(page_id).unwrap();
                buffer_pool.unpin_page(page_id, false).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, buffer_pool_benchmark);
criterion_main!(benches);
