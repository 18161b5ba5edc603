//! MPSC queue throughput and latency benchmark.
//!
//! Usage:
//!     cargo run --release --bin mpsc_bench
//!
//! Environment variables:
//!     PRODUCER_CPU=0  Pin the first producer to CPU 0 (default: 0); further
//!                     producers take the following CPUs, skipping the consumer
//!     CONSUMER_CPU=2  Pin consumer to CPU 2 (default: 2)
//!     PRODUCERS=4     Producer threads in the contended run (default: 4)

use std::env;
use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use ringlog::{BoundedQueue, OverwriteWhenFull, PolicyQueue};

const QUEUE_SIZE: usize = 1 << 16;
const ITERATIONS: usize = 1 << 22;

type Payload = u64;

struct Pinning {
    producer_cpu: Option<usize>,
    consumer_cpu: Option<usize>,
    producers: usize,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn pinning_from_env() -> Pinning {
    Pinning {
        producer_cpu: Some(env_or("PRODUCER_CPU", 0)),
        consumer_cpu: Some(env_or("CONSUMER_CPU", 2)),
        producers: env_or("PRODUCERS", 4).max(1),
    }
}

fn pin_to_cpu(cpu: Option<usize>) {
    if let Some(id) = cpu {
        core_affinity::set_for_current(core_affinity::CoreId { id });
    }
}

/// CPU for producer `index`, stepping over the consumer's CPU.
fn producer_cpu(pinning: &Pinning, index: usize) -> Option<usize> {
    let base = pinning.producer_cpu?;
    let mut cpu = base + index;
    if let Some(consumer) = pinning.consumer_cpu
        && cpu >= consumer
        && base <= consumer
    {
        cpu += 1;
    }
    Some(cpu)
}

fn wait_for(flag: &AtomicBool) {
    while !flag.load(Ordering::Acquire) {
        hint::spin_loop();
    }
}

fn bench_throughput(pinning: &Pinning, producers: usize) {
    let (tx, rx) = BoundedQueue::<Payload>::with_capacity(QUEUE_SIZE).split();
    let per_producer = ITERATIONS / producers;
    let total = per_producer * producers;

    let start_flag = Arc::new(AtomicBool::new(false));
    let handles: Vec<_> = (0..producers)
        .map(|index| {
            let tx = tx.clone();
            let start_flag = Arc::clone(&start_flag);
            let cpu = producer_cpu(pinning, index);
            thread::spawn(move || {
                pin_to_cpu(cpu);
                wait_for(&start_flag);
                let tag = (index as Payload) << 48;
                for i in 0..per_producer as Payload {
                    tx.push_back(tag | i);
                }
            })
        })
        .collect();
    drop(tx);

    pin_to_cpu(pinning.consumer_cpu);
    let mut last = vec![None; producers];

    let start = Instant::now();
    start_flag.store(true, Ordering::Release);

    let mut received = 0;
    while received < total {
        if let Some(value) = rx.pop_front() {
            let producer = (value >> 48) as usize;
            let seq = value & ((1 << 48) - 1);
            if let Some(prev) = last[producer]
                && prev >= seq
            {
                panic!("Reordering: producer {producer} sent {seq} after {prev}");
            }
            last[producer] = Some(seq);
            received += 1;
        } else {
            hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();

    for h in handles {
        h.join().unwrap();
    }

    let ops_per_ms = total as u128 * 1_000_000 / elapsed.as_nanos();
    println!("  {producers} producer(s): {ops_per_ms} ops/ms");
}

fn bench_rtt(pinning: &Pinning) {
    let (q1_tx, q1_rx) = BoundedQueue::<Payload>::with_capacity(QUEUE_SIZE).split();
    let (q2_tx, q2_rx) = BoundedQueue::<Payload>::with_capacity(QUEUE_SIZE).split();

    let ready = Arc::new(AtomicBool::new(false));
    let ready_clone = Arc::clone(&ready);
    let consumer_cpu = pinning.consumer_cpu;

    let responder = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        ready_clone.store(true, Ordering::Release);

        for _ in 0..ITERATIONS {
            loop {
                if let Some(value) = q1_rx.pop_front() {
                    q2_tx.push_back(value);
                    break;
                }
                hint::spin_loop();
            }
        }
    });

    wait_for(&ready);
    pin_to_cpu(pinning.producer_cpu);

    let start = Instant::now();
    for i in 0..ITERATIONS as Payload {
        q1_tx.push_back(i);
        loop {
            if q2_rx.pop_front().is_some() {
                break;
            }
            hint::spin_loop();
        }
    }
    let elapsed = start.elapsed();
    responder.join().unwrap();

    let rtt_ns = elapsed.as_nanos() / ITERATIONS as u128;
    println!("  {rtt_ns} ns RTT");
}

/// Producers push into a small overwriting queue while the consumer drains
/// what it can; reports push rate and how many entries survived.
fn bench_overwrite(pinning: &Pinning) {
    let (writer, reader) = PolicyQueue::<Payload, OverwriteWhenFull>::new(1024).split();
    let done = Arc::new(AtomicBool::new(false));
    let done_clone = Arc::clone(&done);
    let consumer_cpu = pinning.consumer_cpu;

    let consumer = thread::spawn(move || {
        pin_to_cpu(consumer_cpu);
        let mut kept = 0usize;
        loop {
            if reader.read().is_ok() {
                kept += 1;
            } else if done_clone.load(Ordering::Acquire) {
                return kept + reader.drain().count();
            } else {
                hint::spin_loop();
            }
        }
    });

    pin_to_cpu(pinning.producer_cpu);
    let start = Instant::now();
    for i in 0..ITERATIONS as Payload {
        // Never fails under the overwrite policy.
        let _ = writer.push(i);
    }
    let elapsed = start.elapsed();
    done.store(true, Ordering::Release);
    let kept = consumer.join().unwrap();

    let ops_per_ms = ITERATIONS as u128 * 1_000_000 / elapsed.as_nanos();
    println!("  {ops_per_ms} ops/ms, {kept}/{ITERATIONS} entries read");
}

fn main() {
    let pinning = pinning_from_env();

    println!("ringlog MPSC (size={QUEUE_SIZE}, iters={ITERATIONS}):");
    println!("throughput");
    bench_throughput(&pinning, 1);
    if pinning.producers > 1 {
        bench_throughput(&pinning, pinning.producers);
    }
    println!("round trip");
    bench_rtt(&pinning);
    println!("overwrite (size=1024)");
    bench_overwrite(&pinning);
}
