//! Frame relay push/pop benchmarks

use criterion::{Criterion, criterion_group, criterion_main};
use rov::relay::{Frame, FrameRelay};
use rov_common::mode::StreamChannel;
use std::hint::black_box;
use std::sync::Arc;
use std::thread;

fn frame(seq: u64) -> Frame {
    Frame::new(StreamChannel::Down, seq, 320, 240, vec![0x40; 320 * 240 * 3])
}

/// Push into a full relay: every push evicts one frame.
fn bench_push_full(c: &mut Criterion) {
    let relay = FrameRelay::<Frame>::new(15);
    let template = frame(0);
    for _ in 0..15 {
        relay.push(template.clone());
    }

    c.bench_function("relay_push_evicting", |b| {
        b.iter(|| black_box(relay.push(black_box(template.clone()))));
    });
}

/// Alternating push and pop on an empty relay.
fn bench_push_pop(c: &mut Criterion) {
    let relay = FrameRelay::<Frame>::new(15);
    let template = frame(0);

    c.bench_function("relay_push_pop", |b| {
        b.iter(|| {
            relay.push(template.clone());
            black_box(relay.pop_latest())
        });
    });
}

/// Producer pushing while two gates drain the same relay.
fn bench_contended(c: &mut Criterion) {
    c.bench_function("relay_1_producer_2_consumers", |b| {
        b.iter(|| {
            let relay = Arc::new(FrameRelay::<Frame>::new(15));
            let template = frame(0);
            let consumers: Vec<_> = (0..2)
                .map(|_| {
                    let relay = Arc::clone(&relay);
                    thread::spawn(move || {
                        let mut got = 0;
                        for _ in 0..500 {
                            if relay.pop_latest().is_some() {
                                got += 1;
                            }
                        }
                        got
                    })
                })
                .collect();

            for _ in 0..1000 {
                relay.push(template.clone());
            }
            for consumer in consumers {
                black_box(consumer.join().unwrap());
            }
        });
    });
}

criterion_group!(benches, bench_push_full, bench_push_pop, bench_contended);
criterion_main!(benches);
