//! Work distribution for pointer repair and validation.
//!
//! Work items are pushed onto a shared [`SegQueue`] and drained by scoped
//! worker threads, so items may borrow from the heap.

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

/// Apply `f` to every item on up to `workers` threads.
///
/// Results are returned in item order. With one worker or a single item the
/// work runs on the calling thread. A panic in a worker is resumed on the
/// caller after all workers stopped.
pub fn fan_out<T, R, F>(workers: usize, items: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Sync,
{
    let len = items.len();
    let workers = workers.min(len);
    if workers <= 1 {
        return items.into_iter().map(f).collect();
    }

    let queue = SegQueue::new();
    for item in items.into_iter().enumerate() {
        queue.push(item);
    }
    let results = Mutex::new(Vec::with_capacity(len));

    let joined = crossbeam::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|_| {
                let mut local = Vec::new();
                while let Some((idx, item)) = queue.pop() {
                    local.push((idx, f(item)));
                }
                results.lock().extend(local);
            });
        }
    });
    if let Err(panic) = joined {
        std::panic::resume_unwind(panic);
    }

    let mut results = results.into_inner();
    results.sort_unstable_by_key(|&(idx, _)| idx);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_preserves_order() {
        let items: Vec<u64> = (0..100).collect();
        let doubled = fan_out(4, items, |x| x * 2);
        assert_eq!(doubled, (0..100).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_fan_out_serial() {
        let calls = std::sync::atomic::AtomicUsize::new(0);
        let out = fan_out(1, vec![1, 2, 3], |x| {
            calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            x + 1
        });
        assert_eq!(out, vec![2, 3, 4]);
        assert_eq!(calls.into_inner(), 3);
    }

    #[test]
    fn test_fan_out_borrowed_mut_items() {
        let mut values = vec![1, 2, 3, 4, 5];
        let refs: Vec<&mut i32> = values.iter_mut().collect();
        fan_out(3, refs, |value| *value *= 10);
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_fan_out_empty() {
        let out: Vec<u8> = fan_out(8, Vec::<u8>::new(), |x| x);
        assert!(out.is_empty());
    }
}
