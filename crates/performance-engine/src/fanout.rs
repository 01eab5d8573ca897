//! Bounded fan-out over scoped worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

/// Runs `f` over every item on at most `cap` worker threads and joins before
/// returning. Result order matches input order.
pub(crate) fn bounded_map<T, R, F>(items: Vec<T>, cap: usize, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = cap.max(1).min(items.len());
    if workers == 1 {
        return items.into_iter().map(f).collect();
    }

    let slots: Vec<Mutex<Option<T>>> = items.into_iter().map(|item| Mutex::new(Some(item))).collect();
    let results: Vec<Mutex<Option<R>>> = slots.iter().map(|_| Mutex::new(None)).collect();
    let cursor = AtomicUsize::new(0);

    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                if index >= slots.len() {
                    break;
                }
                let item = slots[index].lock().expect("fan-out slot poisoned").take();
                if let Some(item) = item {
                    let outcome = f(item);
                    *results[index].lock().expect("fan-out result poisoned") = Some(outcome);
                }
            });
        }
    });

    results
        .into_iter()
        .map(|slot| {
            slot.into_inner()
                .expect("fan-out result poisoned")
                .expect("fan-out worker completed every slot")
        })
        .collect()
}
