//! A lazy, re-iterable, optionally parallel sequence.
//!
//! [`Seq`] is a pull-stream with a memoizing tee: every element pulled from
//! the underlying source is buffered, and every consumer (a [`Cursor`])
//! reads through that shared buffer at its own position. Deriving a new
//! stage from a sequence therefore never steals elements from pipelines
//! built earlier — they all remain consumable, and re-iteration is
//! deterministic. The first full materialization doubles as the cache.
//!
//! When a [`Pool`] is attached at the root of a pipeline, `map`, `filter`
//! and sort-key evaluation dispatch per-element work onto it. Work runs
//! out of order but results are re-sequenced to input order, and no more
//! than the pool's width is in flight beyond the consumer's demand. Stages
//! without a pool degrade to plain sequential iteration.

mod pool;

pub use pool::Pool;

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

pub struct Seq<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    pool: Option<Pool>,
    state: Mutex<State<T>>,
}

struct State<T> {
    buf: Vec<T>,
    source: Option<Box<dyn Iterator<Item = T> + Send>>,
}

impl<T> Clone for Seq<T> {
    fn clone(&self) -> Self {
        Seq {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for Seq<T> {
    /// Non-consuming: reports only what has been pulled so far.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("Seq")
            .field("buffered", &state.buf.len())
            .field("exhausted", &state.source.is_none())
            .finish()
    }
}

impl<T: Clone + Send + 'static> Default for Seq<T> {
    fn default() -> Self {
        Seq::empty()
    }
}

impl<T: Clone + Send + 'static> Seq<T> {
    fn build(source: Box<dyn Iterator<Item = T> + Send>, pool: Option<Pool>) -> Self {
        Seq {
            inner: Arc::new(Inner {
                pool,
                state: Mutex::new(State {
                    buf: Vec::new(),
                    source: Some(source),
                }),
            }),
        }
    }

    pub fn empty() -> Self {
        Seq::of(Vec::new())
    }

    /// A sequence over already-materialized items.
    pub fn of(items: Vec<T>) -> Self {
        Seq {
            inner: Arc::new(Inner {
                pool: None,
                state: Mutex::new(State {
                    buf: items,
                    source: None,
                }),
            }),
        }
    }

    pub fn from_iter<I>(iter: I) -> Self
    where
        I: Iterator<Item = T> + Send + 'static,
    {
        Seq::build(Box::new(iter), None)
    }

    /// Attach a worker pool. Downstream stages inherit it.
    pub fn with_pool(self, pool: Option<Pool>) -> Self {
        let Inner { pool: _, state } = match Arc::try_unwrap(self.inner) {
            Ok(inner) => inner,
            Err(shared) => {
                // Already shared: start a fresh stage reading through it.
                let cursor = Cursor {
                    seq: Seq { inner: shared },
                    idx: 0,
                };
                return Seq::build(Box::new(cursor), pool);
            }
        };
        Seq {
            inner: Arc::new(Inner { pool, state }),
        }
    }

    pub fn pool(&self) -> Option<Pool> {
        self.inner.pool.clone()
    }

    /// Pull (and memoize) the element at `idx`, if any.
    fn get(&self, idx: usize) -> Option<T> {
        let mut state = self.inner.state.lock().unwrap();
        while state.buf.len() <= idx {
            let Some(source) = state.source.as_mut() else {
                return None;
            };
            match source.next() {
                Some(item) => state.buf.push(item),
                None => {
                    state.source = None;
                    return None;
                }
            }
        }
        Some(state.buf[idx].clone())
    }

    /// A fresh consumer over this sequence. Cheap; shares the memo buffer.
    pub fn iter(&self) -> Cursor<T> {
        Cursor {
            seq: self.clone(),
            idx: 0,
        }
    }

    /// Lazy 1-to-1 transform. Runs on the pool when one is attached,
    /// re-sequencing results to input order.
    pub fn map<R, F>(&self, f: F) -> Seq<R>
    where
        R: Clone + Send + 'static,
        F: Fn(T) -> R + Send + Sync + 'static,
    {
        let cursor = self.iter();
        match self.pool() {
            Some(pool) => Seq::build(
                Box::new(OrderedDispatch::new(cursor, pool.clone(), Arc::new(f))),
                Some(pool),
            ),
            None => Seq::build(Box::new(cursor.map(f)), None),
        }
    }

    /// Lazy filter. Predicates are evaluated on the pool when one is
    /// attached; output preserves source order.
    pub fn filter<F>(&self, f: F) -> Seq<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let cursor = self.iter();
        match self.pool() {
            Some(pool) => {
                let keep = Arc::new(move |item: T| {
                    let retain = f(&item);
                    (item, retain)
                });
                let dispatched = OrderedDispatch::new(cursor, pool.clone(), keep);
                Seq::build(
                    Box::new(dispatched.filter_map(|(item, retain)| retain.then_some(item))),
                    Some(pool),
                )
            }
            None => Seq::build(Box::new(cursor.filter(move |item| f(item))), None),
        }
    }

    /// Lazy concatenation; empty results simply contribute nothing.
    pub fn flat_map<R, I, F>(&self, f: F) -> Seq<R>
    where
        R: Clone + Send + 'static,
        I: IntoIterator<Item = R>,
        I::IntoIter: Send + 'static,
        F: Fn(T) -> I + Send + Sync + 'static,
    {
        let pool = self.pool();
        Seq::build(
            Box::new(self.iter().flat_map(move |item| f(item).into_iter())),
            pool,
        )
    }

    /// Stable sort by key, ascending (or descending with `reverse`).
    /// Key evaluation is parallel when a pool is attached; the sort itself
    /// is eager but deferred until the first element is pulled.
    pub fn sort_by_key<K, F>(&self, key: F, reverse: bool) -> Seq<T>
    where
        K: Ord + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let this = self.clone();
        let pool = self.pool();
        let spawn_pool = pool.clone();
        let key = Arc::new(key);
        let source = DeferredVec::new(move || {
            let items: Vec<T> = this.iter().collect();
            let keys = keys_for(&items, &key, spawn_pool.as_ref());
            let mut order: Vec<usize> = (0..items.len()).collect();
            if reverse {
                // Flip the comparator rather than the output so that the
                // stable sort keeps equal-keyed items in source order.
                order.sort_by(|&a, &b| keys[b].cmp(&keys[a]));
            } else {
                order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));
            }
            reorder(items, order)
        });
        Seq::build(Box::new(source), pool)
    }

    /// First-seen-wins dedup by key, preserving source order.
    pub fn unique_by<K, F>(&self, key: F) -> Seq<T>
    where
        K: Eq + Hash + Send + 'static,
        F: Fn(&T) -> K + Send + Sync + 'static,
    {
        let pool = self.pool();
        let mut seen = HashSet::new();
        Seq::build(
            Box::new(self.iter().filter(move |item| seen.insert(key(item)))),
            pool,
        )
    }

    /// Eager sort by key, then adjacent-equal grouping. Groups are emitted
    /// in ascending key order; members keep their source order.
    pub fn group_by<K, R, KF, BF>(&self, key: KF, build: BF) -> Seq<R>
    where
        K: Ord + Clone + Send + 'static,
        R: Clone + Send + 'static,
        KF: Fn(&T) -> K + Send + Sync + 'static,
        BF: Fn(K, Seq<T>) -> R + Send + Sync + 'static,
    {
        let this = self.clone();
        let pool = self.pool();
        let inner_pool = pool.clone();
        let key = Arc::new(key);
        let source = DeferredVec::new(move || {
            let items: Vec<T> = this.iter().collect();
            let keys = keys_for(&items, &key, inner_pool.as_ref());
            let mut order: Vec<usize> = (0..items.len()).collect();
            order.sort_by(|&a, &b| keys[a].cmp(&keys[b]));

            let mut groups = Vec::new();
            let mut current: Option<(K, Vec<T>)> = None;
            for (item, item_key) in reorder_with_keys(items, keys, order) {
                match current.as_mut() {
                    Some((run_key, run)) if *run_key == item_key => run.push(item),
                    _ => {
                        if let Some((run_key, run)) = current.take() {
                            let members = Seq::of(run).with_pool(inner_pool.clone());
                            groups.push(build(run_key, members));
                        }
                        current = Some((item_key, vec![item]));
                    }
                }
            }
            if let Some((run_key, run)) = current {
                let members = Seq::of(run).with_pool(inner_pool.clone());
                groups.push(build(run_key, members));
            }
            groups
        });
        Seq::build(Box::new(source), pool)
    }

    /// Eager left fold over pairs; `None` on an empty sequence.
    pub fn reduce<F>(&self, f: F) -> Option<T>
    where
        F: Fn(T, T) -> T,
    {
        let mut cursor = self.iter();
        let first = cursor.next()?;
        Some(cursor.fold(first, f))
    }

    /// Short-circuiting existential.
    pub fn some<F>(&self, f: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.iter().any(|item| f(&item))
    }

    /// Short-circuiting universal.
    pub fn every<F>(&self, f: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.iter().all(|item| f(&item))
    }

    pub fn first(&self) -> Option<T> {
        self.get(0)
    }

    pub fn first_or(&self, default: T) -> T {
        self.get(0).unwrap_or(default)
    }

    pub fn nth(&self, n: usize) -> Option<T> {
        self.get(n)
    }

    /// Materialize. Cached: subsequent calls re-read the memo buffer.
    pub fn list(&self) -> Vec<T> {
        self.iter().collect()
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.get(0).is_none()
    }

    /// Lazy `[start, end)` slice; `None` end means "to the end".
    pub fn slice(&self, start: usize, end: Option<usize>) -> Seq<T> {
        let pool = self.pool();
        let cursor = self.iter().skip(start);
        match end {
            Some(end) => Seq::build(Box::new(cursor.take(end.saturating_sub(start))), pool),
            None => Seq::build(Box::new(cursor), pool),
        }
    }

    pub fn take(&self, n: usize) -> Seq<T> {
        self.slice(0, Some(n))
    }
}

impl<T: Clone + Send + 'static> IntoIterator for Seq<T> {
    type Item = T;
    type IntoIter = Cursor<T>;

    fn into_iter(self) -> Cursor<T> {
        self.iter()
    }
}

impl<T: Clone + Send + 'static> FromIterator<T> for Seq<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Seq::of(iter.into_iter().collect())
    }
}

/// A reading position into a [`Seq`]'s shared memo buffer.
pub struct Cursor<T> {
    seq: Seq<T>,
    idx: usize,
}

impl<T: Clone + Send + 'static> Iterator for Cursor<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let item = self.seq.get(self.idx);
        if item.is_some() {
            self.idx += 1;
        }
        item
    }
}

/// Evaluate `key` over `items`, on the pool when given, preserving order.
fn keys_for<T, K, F>(items: &[T], key: &Arc<F>, pool: Option<&Pool>) -> Vec<K>
where
    T: Clone + Send + 'static,
    K: Send + 'static,
    F: Fn(&T) -> K + Send + Sync + 'static,
{
    match pool {
        Some(pool) => {
            let (tx, rx) = mpsc::channel();
            for (idx, item) in items.iter().cloned().enumerate() {
                let tx = tx.clone();
                let key = Arc::clone(key);
                pool.spawn(move || {
                    let _ = tx.send((idx, key(&item)));
                });
            }
            drop(tx);
            let mut keys: Vec<Option<K>> = (0..items.len()).map(|_| None).collect();
            let mut received = 0;
            while received < items.len() {
                let (idx, k) = rx
                    .recv()
                    .expect("sequence worker panicked while evaluating a sort key");
                keys[idx] = Some(k);
                received += 1;
            }
            keys.into_iter()
                .map(|k| k.expect("a key was computed for every index"))
                .collect()
        }
        None => items.iter().map(|item| key(item)).collect(),
    }
}

fn reorder<T>(items: Vec<T>, order: Vec<usize>) -> Vec<T> {
    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|idx| slots[idx].take().expect("permutation visits each index once"))
        .collect()
}

fn reorder_with_keys<T, K>(
    items: Vec<T>,
    keys: Vec<K>,
    order: Vec<usize>,
) -> impl Iterator<Item = (T, K)> {
    let mut slots: Vec<Option<(T, K)>> = items.into_iter().zip(keys).map(Some).collect();
    order
        .into_iter()
        .map(move |idx| slots[idx].take().expect("permutation visits each index once"))
}

/// Dispatches one task per element onto the pool, keeping at most the
/// pool's width in flight, and yields results in input order.
struct OrderedDispatch<T, R> {
    source: Cursor<T>,
    pool: Pool,
    f: Arc<dyn Fn(T) -> R + Send + Sync>,
    pending: VecDeque<mpsc::Receiver<R>>,
    exhausted: bool,
}

impl<T: Clone + Send + 'static, R: Send + 'static> OrderedDispatch<T, R> {
    fn new(source: Cursor<T>, pool: Pool, f: Arc<dyn Fn(T) -> R + Send + Sync>) -> Self {
        OrderedDispatch {
            source,
            pool,
            f,
            pending: VecDeque::new(),
            exhausted: false,
        }
    }

    fn refill(&mut self) {
        while !self.exhausted && self.pending.len() < self.pool.width() {
            match self.source.next() {
                Some(item) => {
                    let (tx, rx) = mpsc::channel();
                    let f = Arc::clone(&self.f);
                    self.pool.spawn(move || {
                        let _ = tx.send(f(item));
                    });
                    self.pending.push_back(rx);
                }
                None => self.exhausted = true,
            }
        }
    }
}

impl<T: Clone + Send + 'static, R: Send + 'static> Iterator for OrderedDispatch<T, R> {
    type Item = R;

    fn next(&mut self) -> Option<R> {
        self.refill();
        let rx = self.pending.pop_front()?;
        let item = rx
            .recv()
            .expect("sequence worker panicked while evaluating an element");
        Some(item)
    }
}

/// An iterator whose backing Vec is produced on the first pull.
struct DeferredVec<T, F> {
    produce: Option<F>,
    items: Option<std::vec::IntoIter<T>>,
}

impl<T, F: FnOnce() -> Vec<T>> DeferredVec<T, F> {
    fn new(produce: F) -> Self {
        DeferredVec {
            produce: Some(produce),
            items: None,
        }
    }
}

impl<T, F: FnOnce() -> Vec<T>> Iterator for DeferredVec<T, F> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.items.is_none() {
            let produce = self.produce.take()?;
            self.items = Some(produce().into_iter());
        }
        self.items.as_mut().and_then(|items| items.next())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn digits() -> Seq<i64> {
        Seq::of((0..10).collect())
    }

    #[test]
    fn map_filter_compose_lazily() {
        let evens = digits().filter(|n| n % 2 == 0).map(|n| n * 10);
        assert_eq!(evens.list(), vec![0, 20, 40, 60, 80]);
        // Re-iteration yields the same elements.
        assert_eq!(evens.list(), vec![0, 20, 40, 60, 80]);
    }

    #[test]
    fn tee_keeps_prior_pipelines_consumable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = {
            let calls = Arc::clone(&calls);
            digits().map(move |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                n
            })
        };
        let doubled = counted.map(|n| n * 2);
        let tripled = counted.map(|n| n * 3);
        assert_eq!(doubled.list()[9], 18);
        assert_eq!(tripled.list()[9], 27);
        // The shared stage ran each element exactly once.
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn first_is_lazy() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let seq = {
            let pulled = Arc::clone(&pulled);
            Seq::from_iter((0..1000).inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            }))
        };
        assert_eq!(seq.first(), Some(0));
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sort_is_stable_both_directions() {
        let items = Seq::of(vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd')]);
        let asc = items.sort_by_key(|&(n, _)| n, false);
        assert_eq!(asc.list(), vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c')]);
        let desc = items.sort_by_key(|&(n, _)| n, true);
        assert_eq!(desc.list(), vec![(1, 'a'), (1, 'c'), (0, 'b'), (0, 'd')]);
    }

    #[test]
    fn unique_keeps_first_seen_in_source_order() {
        let seq = Seq::of(vec!["apple", "avocado", "banana", "cherry"]);
        let by_initial = seq.unique_by(|s| s.as_bytes()[0]);
        assert_eq!(by_initial.list(), vec!["apple", "banana", "cherry"]);
    }

    #[test]
    fn group_by_partitions_every_element_once() {
        let seq = Seq::of((0..10).collect::<Vec<i64>>());
        let groups = seq.group_by(|n| n % 3, |key, members| (key, members.list()));
        let groups = groups.list();
        assert_eq!(groups.len(), 3);
        // Ascending key order, members in source order.
        assert_eq!(groups[0], (0, vec![0, 3, 6, 9]));
        assert_eq!(groups[1], (1, vec![1, 4, 7]));
        assert_eq!(groups[2], (2, vec![2, 5, 8]));
        let total: usize = groups.iter().map(|(_, members)| members.len()).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn reduce_and_terminals() {
        assert_eq!(digits().reduce(|a, b| a + b), Some(45));
        assert_eq!(Seq::<i64>::empty().reduce(|a, b| a + b), None);
        assert!(digits().some(|&n| n == 7));
        assert!(!digits().every(|&n| n < 5));
        assert_eq!(digits().first_or(-1), 0);
        assert_eq!(Seq::<i64>::empty().first_or(-1), -1);
        assert_eq!(digits().len(), 10);
        assert!(Seq::<i64>::empty().is_empty());
    }

    #[test]
    fn slice_is_lazy() {
        assert_eq!(digits().slice(2, Some(5)).list(), vec![2, 3, 4]);
        assert_eq!(digits().slice(8, None).list(), vec![8, 9]);
        assert_eq!(digits().take(3).list(), vec![0, 1, 2]);
    }

    #[test]
    fn flat_map_skips_empty() {
        let seq = Seq::of(vec![1, 2, 3]);
        let odds_doubled = seq.flat_map(|n| if n % 2 == 1 { vec![n, n] } else { vec![] });
        assert_eq!(odds_doubled.list(), vec![1, 1, 3, 3]);
    }

    #[test]
    fn parallel_map_preserves_input_order() {
        let pool = Pool::new(4).unwrap();
        let seq = Seq::of((0..100).collect::<Vec<i64>>()).with_pool(Some(pool));
        let mapped = seq.map(|n| {
            // Earlier elements sleep longer: out-of-order completion.
            std::thread::sleep(std::time::Duration::from_micros(100 - n as u64));
            n * 2
        });
        assert_eq!(mapped.list(), (0..100).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn parallel_filter_and_sort_preserve_order() {
        let pool = Pool::new(4).unwrap();
        let seq = Seq::of((0..50).rev().collect::<Vec<i64>>()).with_pool(Some(pool));
        let kept = seq.filter(|&n| n % 5 == 0);
        assert_eq!(kept.list(), vec![45, 40, 35, 30, 25, 20, 15, 10, 5, 0]);
        let sorted = kept.sort_by_key(|&n| n, false);
        assert_eq!(sorted.list(), vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45]);
    }

    #[test]
    fn bounded_prefetch_beyond_demand() {
        let pool = Pool::new(2).unwrap();
        let pulled = Arc::new(AtomicUsize::new(0));
        let seq = {
            let pulled = Arc::clone(&pulled);
            Seq::from_iter((0..1000).inspect(move |_| {
                pulled.fetch_add(1, Ordering::SeqCst);
            }))
            .with_pool(Some(pool))
        };
        let mapped = seq.map(|n| n);
        assert_eq!(mapped.first(), Some(0));
        // One element demanded; no more than the pool width beyond it
        // (plus the one-element lookahead that detects exhaustion).
        assert!(pulled.load(Ordering::SeqCst) <= 3);
    }
}
