use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lockfree_containers::{ArrayQueue, LinkQueue};

const CAPACITY: usize = 4096;
const OPS_PER_THREAD: usize = 2000;

fn contended_array_queue(threads: usize) {
    let queue: Arc<ArrayQueue<usize, CAPACITY>> = Arc::new(ArrayQueue::new());
    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                while queue.push(black_box(t * OPS_PER_THREAD + i)).is_err() {
                    thread::yield_now();
                }
                queue.pop();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn contended_link_queue(threads: usize) {
    let queue: Arc<LinkQueue<usize>> = Arc::new(LinkQueue::new(CAPACITY));
    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                while queue.push(black_box(t * OPS_PER_THREAD + i)).is_err() {
                    thread::yield_now();
                }
                queue.pop();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn contended_mutex_vecdeque(threads: usize) {
    let queue: Arc<Mutex<VecDeque<usize>>> = Arc::new(Mutex::new(VecDeque::with_capacity(CAPACITY)));
    let mut handles = Vec::with_capacity(threads);
    for t in 0..threads {
        let queue = Arc::clone(&queue);
        handles.push(thread::spawn(move || {
            for i in 0..OPS_PER_THREAD {
                queue.lock().unwrap().push_back(black_box(t * OPS_PER_THREAD + i));
                queue.lock().unwrap().pop_front();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

fn benchmark_push_pop_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("Contended push/pop roundtrip");

    for threads in [1, 4, 8] {
        group.bench_function(format!("ArrayQueue/{threads}threads"), |b| {
            b.iter(|| contended_array_queue(threads))
        });
        group.bench_function(format!("LinkQueue/{threads}threads"), |b| {
            b.iter(|| contended_link_queue(threads))
        });
        group.bench_function(format!("Mutex<VecDeque>/{threads}threads"), |b| {
            b.iter(|| contended_mutex_vecdeque(threads))
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_push_pop_roundtrip);
criterion_main!(benches);
