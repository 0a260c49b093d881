use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ledger_trie::{AccountId, AccountTrie, TrieConfig};
use rayon::prelude::*;

const SHARDS: usize = 16;

fn keys(n: u64) -> Vec<u64> {
    (0..n).map(|i| i.wrapping_mul(0x9E37_79B9_7F4A_7C15)).collect()
}

fn build_sharded(keys: &[u64]) -> AccountTrie<u64> {
    let trie = AccountTrie::new(TrieConfig::default()).unwrap();
    let chunk = keys.len().div_ceil(SHARDS);
    let serials: Vec<_> = keys
        .par_chunks(chunk)
        .map(|part| {
            let mut serial = trie.open_serial_subsidiary();
            for &k in part {
                serial.insert(AccountId(k), k);
            }
            serial
        })
        .collect();
    trie.batch_merge_in(serials);
    trie
}

fn merge_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for n in [10_000u64, 100_000].iter() {
        group.throughput(Throughput::Elements(*n));
        group.bench_with_input(BenchmarkId::new("serial_insert", n), n, |b, &n| {
            let samples = keys(n);
            b.iter_with_large_drop(|| {
                let trie = AccountTrie::new(TrieConfig::default()).unwrap();
                for &k in black_box(&samples) {
                    trie.insert(AccountId(k), k);
                }
                trie
            });
        });
        group.bench_with_input(BenchmarkId::new("batch_merge", n), n, |b, &n| {
            let samples = keys(n);
            b.iter_with_large_drop(|| build_sharded(black_box(&samples)));
        });
    }
    group.finish();
}

fn hash_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash");

    for n in [10_000u64, 100_000].iter() {
        group.throughput(Throughput::Elements(*n));
        group.bench_with_input(BenchmarkId::new("serial", n), n, |b, &n| {
            let samples = keys(n);
            b.iter_with_large_drop(|| {
                let trie = build_sharded(&samples);
                black_box(trie.hash_serial());
                trie
            });
        });
        group.bench_with_input(BenchmarkId::new("parallel", n), n, |b, &n| {
            let samples = keys(n);
            b.iter_with_large_drop(|| {
                let trie = build_sharded(&samples);
                black_box(trie.freeze_and_hash());
                trie
            });
        });
    }
    group.finish();
}

criterion_group!(benches, merge_benchmark, hash_benchmark);
criterion_main!(benches);
