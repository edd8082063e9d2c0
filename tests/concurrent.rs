//! Multi-threaded behaviour of the bit set.

use sparsebits::{BitSet, BitSetParams, Metrics, statistics::TracingSink};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn disjoint_writers_are_all_visible_after_join() {
    let bits = Arc::new(BitSet::with_log2_segment_size(1 << 24, 16).unwrap());
    let threads = 8u64;
    let per_thread = 20_000u64;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let bits = Arc::clone(&bits);
            thread::spawn(move || {
                // interleave so that threads share segments, pages and words
                for i in 0..per_thread {
                    bits.set(i * threads + t, true);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for i in 0..threads * per_thread {
        assert!(bits.get(i), "bit {i} lost");
    }
    assert_eq!(bits.cardinality(), threads * per_thread);
}

#[test]
fn racing_creators_agree_on_one_segment_per_slot() {
    let threads = 16;
    let bits = BitSet::with_log2_segment_size(1 << 20, 14).unwrap();
    let barrier = Barrier::new(threads);

    thread::scope(|s| {
        for t in 0..threads {
            let bits = &bits;
            let barrier = &barrier;
            s.spawn(move || {
                barrier.wait();
                // every thread writes one bit into each of the first 8 segments
                for segment in 0..8u64 {
                    bits.set(segment * (1 << 14) + t as u64, true);
                }
            });
        }
    });

    let metrics = bits.metrics();
    assert_eq!(metrics.segments_created, 8);
    assert_eq!(metrics.pages_created, 8);
    assert!(metrics.segment_map_locks >= 8);
    assert!(metrics.segment_map_locks <= 8 * threads as u64);
    assert_eq!(metrics.total_operations, 8 * threads as u64);
    assert_eq!(bits.cardinality(), 8 * threads as u64);
    for segment in 0..8 {
        assert_eq!(bits.segment(segment).unwrap().page_count(), 1);
    }
}

#[test]
fn concurrent_setters_and_clearers_on_shared_words() {
    let bits = BitSet::with_log2_segment_size(4096, 12).unwrap();
    bits.set_range(0, 4095);

    thread::scope(|s| {
        // clear even bits while odd bits are re-set in the same words
        s.spawn(|| {
            for i in (0..4096).step_by(2) {
                bits.set(i, false);
            }
        });
        s.spawn(|| {
            for i in (1..4096).step_by(2) {
                bits.set(i, true);
            }
        });
    });

    assert_eq!(bits.cardinality(), 2048);
    assert_eq!(bits.next_clear_bit(0), 0);
    assert_eq!(bits.next_set_bit(0), Some(1));
}

#[test]
fn scans_run_alongside_writers() {
    let bits = BitSet::with_log2_segment_size(1 << 20, 13).unwrap();
    for i in (0..1 << 20).step_by(1000) {
        bits.set(i, true);
    }

    thread::scope(|s| {
        s.spawn(|| {
            for i in (500..1 << 20).step_by(1000) {
                bits.set(i, true);
            }
        });
        s.spawn(|| {
            // bits written before the scan started are always found
            let seen: Vec<u64> = bits.iter_ones().filter(|i| i % 1000 == 0).collect();
            assert_eq!(seen.len(), (1 << 20) / 1000 + 1);
        });
    });

    let written = (0..1u64 << 20).step_by(1000).count() + (500..1u64 << 20).step_by(1000).count();
    assert_eq!(written, 2098);
    assert_eq!(bits.cardinality(), written as u64);
}

#[test]
fn tracing_sink_under_concurrent_load() {
    let metrics = Arc::new(Metrics::with_sink(Arc::new(TracingSink)));
    let bits = BitSet::with_metrics(&BitSetParams::new(1 << 20, 12), Arc::clone(&metrics)).unwrap();

    thread::scope(|s| {
        for t in 0..4u64 {
            let bits = &bits;
            s.spawn(move || {
                for i in 0..1000 {
                    bits.set(t * 250_000 + i, true);
                }
            });
        }
    });

    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.total_operations, 4000);
    assert_eq!(snapshot.segments_created, 4);
    assert_eq!(snapshot.pages_created, 4);
}
