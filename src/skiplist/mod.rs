//! Concurrent skiplist
//!
//! Ordered map backing every index. Lookups and range scans are lock-free
//! and never wait for writers; insert and remove validate and relink under
//! fine-grained per-node locks (the optimistic lazy skiplist of Herlihy and
//! Shavit). A node is unlinked from every level under its predecessors'
//! locks, so by the time it is retired it is unreachable from the head;
//! epoch-based reclamation (crossbeam-epoch) then frees it once no pinned
//! reader can still hold a reference.
//!
//! Level assignment is geometric with p = 0.5, capped at [`MAX_HEIGHT`].

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};
use rand::Rng;
use std::cmp::Ordering as KeyOrdering;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Maximum tower height. log2 of the largest practical entry count.
pub const MAX_HEIGHT: usize = 32;

struct Node<K, V> {
    /// `None` only for the head sentinel.
    key: Option<K>,
    value: Option<V>,
    /// Forward pointers, one per level; length is the node's height.
    next: Vec<Atomic<Node<K, V>>>,
    /// Set once the node is linked at every level of its tower.
    fully_linked: AtomicBool,
    /// Logical deletion flag; a marked node is skipped by scans and stays
    /// linked until its remover unlinks it.
    marked: AtomicBool,
    lock: Mutex<()>,
}

impl<K, V> Node<K, V> {
    fn new(key: K, value: V, height: usize) -> Self {
        Node {
            key: Some(key),
            value: Some(value),
            next: (0..height).map(|_| Atomic::null()).collect(),
            fully_linked: AtomicBool::new(false),
            marked: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    fn head() -> Self {
        Node {
            key: None,
            value: None,
            next: (0..MAX_HEIGHT).map(|_| Atomic::null()).collect(),
            fully_linked: AtomicBool::new(true),
            marked: AtomicBool::new(false),
            lock: Mutex::new(()),
        }
    }

    fn height(&self) -> usize {
        self.next.len()
    }
}

/// A live key/value pair observed by a lookup or scan.
///
/// Borrows from the node; valid for as long as the guard passed to
/// [`SkipList::get`] or [`SkipList::range`] is pinned.
pub struct Entry<'g, K, V> {
    key: &'g K,
    value: &'g V,
}

impl<'g, K, V> Entry<'g, K, V> {
    pub fn key(&self) -> &'g K {
        self.key
    }

    pub fn value(&self) -> &'g V {
        self.value
    }
}

impl<K, V> Clone for Entry<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K, V> Copy for Entry<'_, K, V> {}

/// Concurrent ordered map with lock-free reads.
pub struct SkipList<K, V> {
    head: Atomic<Node<K, V>>,
    len: AtomicUsize,
}

impl<K, V> SkipList<K, V>
where
    K: Ord,
{
    pub fn new() -> Self {
        SkipList {
            head: Atomic::new(Node::head()),
            len: AtomicUsize::new(0),
        }
    }

    /// Number of linked entries, including logically deleted ones that have
    /// not been unlinked yet. Approximate under concurrency.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Geometric height draw, p = 0.5.
    fn random_height(&self) -> usize {
        let bits: u32 = rand::thread_rng().gen();
        (bits.trailing_zeros() as usize + 1).min(MAX_HEIGHT)
    }

    /// Locate `key`: fills the predecessor and successor at every level and
    /// returns the highest level at which an equal key was found. Read-only;
    /// marked nodes are reported as-is and handled by the caller.
    fn find<'g>(
        &self,
        key: &K,
        preds: &mut [Shared<'g, Node<K, V>>; MAX_HEIGHT],
        succs: &mut [Shared<'g, Node<K, V>>; MAX_HEIGHT],
        guard: &'g Guard,
    ) -> Option<usize> {
        let mut lfound = None;
        let mut pred = self.head.load(Ordering::SeqCst, guard);
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Ordering::SeqCst, guard);
            loop {
                let c = match unsafe { curr.as_ref() } {
                    Some(c) => c,
                    None => break,
                };
                let ck = match &c.key {
                    Some(k) => k,
                    None => break,
                };
                match ck.cmp(key) {
                    KeyOrdering::Less => {
                        pred = curr;
                        curr = c.next[level].load(Ordering::SeqCst, guard);
                    }
                    KeyOrdering::Equal => {
                        if lfound.is_none() {
                            lfound = Some(level);
                        }
                        break;
                    }
                    KeyOrdering::Greater => break,
                }
            }
            preds[level] = pred;
            succs[level] = curr;
        }
        lfound
    }

    /// Insert a key/value pair.
    ///
    /// Returns `false` without mutating if an equal, live key is already
    /// present. The linearization point is the store that links the node at
    /// the bottom level; `fully_linked` publishes it to point lookups.
    pub fn insert(&self, key: K, value: V) -> bool {
        let height = self.random_height();
        let guard = &epoch::pin();
        loop {
            let mut preds = [Shared::null(); MAX_HEIGHT];
            let mut succs = [Shared::null(); MAX_HEIGHT];
            if let Some(lfound) = self.find(&key, &mut preds, &mut succs, guard) {
                let found = unsafe { succs[lfound].deref() };
                if !found.marked.load(Ordering::SeqCst) {
                    // A racing insert of the same key may still be linking.
                    while !found.fully_linked.load(Ordering::SeqCst) {
                        std::hint::spin_loop();
                    }
                    return false;
                }
                // Equal key is mid-removal; wait for its unlink and retry.
                std::hint::spin_loop();
                continue;
            }

            // Lock distinct predecessors bottom-up and validate that the
            // window observed by find() still holds.
            let mut locks: Vec<MutexGuard<'_, ()>> = Vec::with_capacity(height);
            let mut prev_pred: Shared<'_, Node<K, V>> = Shared::null();
            let mut valid = true;
            for level in 0..height {
                let pred = preds[level];
                let succ = succs[level];
                if pred != prev_pred {
                    locks.push(lock_node(unsafe { pred.deref() }));
                    prev_pred = pred;
                }
                let p = unsafe { pred.deref() };
                valid = !p.marked.load(Ordering::SeqCst)
                    && p.next[level].load(Ordering::SeqCst, guard) == succ
                    && unsafe { succ.as_ref() }.map_or(true, |s| !s.marked.load(Ordering::SeqCst));
                if !valid {
                    break;
                }
            }
            if !valid {
                continue;
            }

            let mut node = Owned::new(Node::new(key, value, height));
            for level in 0..height {
                node.next[level] = Atomic::from(succs[level]);
            }
            let node = node.into_shared(guard);
            unsafe {
                for level in 0..height {
                    preds[level].deref().next[level].store(node, Ordering::SeqCst);
                }
                node.deref().fully_linked.store(true, Ordering::SeqCst);
            }
            self.len.fetch_add(1, Ordering::Relaxed);
            return true;
        }
    }

    /// Remove a key.
    ///
    /// Returns `false` if the key is absent or another remover already
    /// marked it. The linearization point is the store of `marked`; the
    /// physical unlink and retirement happen before returning, under the
    /// predecessors' locks, so scans holding references stay valid until
    /// their guards drop.
    pub fn remove(&self, key: &K) -> bool {
        self.remove_if(key, |_| true)
    }

    /// Remove a key only if `pred` accepts its value.
    ///
    /// `pred` runs under the victim's lock, before the node is marked, so
    /// the value it inspects belongs to the node that will actually be
    /// unlinked; a concurrent remove-and-reinsert of the same key cannot
    /// slip a fresh entry under an already-taken removal decision.
    pub fn remove_if<F>(&self, key: &K, mut pred: F) -> bool
    where
        F: FnMut(&V) -> bool,
    {
        let guard = &epoch::pin();
        let mut victim: Shared<'_, Node<K, V>> = Shared::null();
        let mut victim_lock: Option<MutexGuard<'_, ()>> = None;
        let mut top_level = 0;
        let mut is_marked = false;
        loop {
            let mut preds = [Shared::null(); MAX_HEIGHT];
            let mut succs = [Shared::null(); MAX_HEIGHT];
            let lfound = self.find(key, &mut preds, &mut succs, guard);
            if !is_marked {
                let lfound = match lfound {
                    Some(l) => l,
                    None => return false,
                };
                let cand = succs[lfound];
                let c = unsafe { cand.deref() };
                if !c.fully_linked.load(Ordering::SeqCst)
                    || c.marked.load(Ordering::SeqCst)
                    || c.height() - 1 != lfound
                {
                    return false;
                }
                let lock = lock_node(c);
                if c.marked.load(Ordering::SeqCst) {
                    return false;
                }
                if let Some(v) = &c.value {
                    if !pred(v) {
                        return false;
                    }
                }
                c.marked.store(true, Ordering::SeqCst);
                victim = cand;
                victim_lock = Some(lock);
                top_level = lfound;
                is_marked = true;
            }

            let v = unsafe { victim.deref() };
            let mut locks: Vec<MutexGuard<'_, ()>> = Vec::with_capacity(top_level + 1);
            let mut prev_pred: Shared<'_, Node<K, V>> = Shared::null();
            let mut valid = true;
            for level in 0..=top_level {
                let pred = preds[level];
                if pred != prev_pred {
                    locks.push(lock_node(unsafe { pred.deref() }));
                    prev_pred = pred;
                }
                let p = unsafe { pred.deref() };
                valid = !p.marked.load(Ordering::SeqCst)
                    && p.next[level].load(Ordering::SeqCst, guard) == victim;
                if !valid {
                    break;
                }
            }
            if !valid {
                continue;
            }

            unsafe {
                for level in (0..=top_level).rev() {
                    let succ = v.next[level].load(Ordering::SeqCst, guard);
                    preds[level].deref().next[level].store(succ, Ordering::SeqCst);
                }
            }
            drop(locks);
            drop(victim_lock);
            self.len.fetch_sub(1, Ordering::Relaxed);
            unsafe {
                guard.defer_destroy(victim);
            }
            return true;
        }
    }

    /// Lock-free point lookup of a live entry.
    pub fn get<'g>(&self, key: &K, guard: &'g Guard) -> Option<Entry<'g, K, V>> {
        let mut pred = self.head.load(Ordering::SeqCst, guard);
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Ordering::SeqCst, guard);
            loop {
                let c = match unsafe { curr.as_ref() } {
                    Some(c) => c,
                    None => break,
                };
                let ck = match &c.key {
                    Some(k) => k,
                    None => break,
                };
                match ck.cmp(key) {
                    KeyOrdering::Less => {
                        pred = curr;
                        curr = c.next[level].load(Ordering::SeqCst, guard);
                    }
                    KeyOrdering::Equal => {
                        if c.fully_linked.load(Ordering::SeqCst) && !c.marked.load(Ordering::SeqCst)
                        {
                            if let (Some(k), Some(v)) = (&c.key, &c.value) {
                                return Some(Entry { key: k, value: v });
                            }
                        }
                        return None;
                    }
                    KeyOrdering::Greater => break,
                }
            }
        }
        None
    }

    /// Lazy, forward-only ascending scan over `[lower, upper]`.
    ///
    /// Entries live at scan start are always observed; entries inserted or
    /// removed concurrently at a position the cursor has not yet reached may
    /// or may not be.
    pub fn range<'g, 'k>(
        &self,
        lower: Bound<&'k K>,
        upper: Bound<&'k K>,
        guard: &'g Guard,
    ) -> Range<'g, 'k, K, V> {
        let mut pred = self.head.load(Ordering::SeqCst, guard);
        for level in (0..MAX_HEIGHT).rev() {
            let mut curr = unsafe { pred.deref() }.next[level].load(Ordering::SeqCst, guard);
            loop {
                let c = match unsafe { curr.as_ref() } {
                    Some(c) => c,
                    None => break,
                };
                let ck = match &c.key {
                    Some(k) => k,
                    None => break,
                };
                let advance = match lower {
                    Bound::Included(lo) => ck < lo,
                    Bound::Excluded(lo) => ck <= lo,
                    Bound::Unbounded => false,
                };
                if !advance {
                    break;
                }
                pred = curr;
                curr = c.next[level].load(Ordering::SeqCst, guard);
            }
        }
        let start = unsafe { pred.deref() }.next[0].load(Ordering::SeqCst, guard);
        Range {
            current: start,
            upper,
            guard,
        }
    }

    /// Scan of the whole list.
    pub fn iter<'g>(&self, guard: &'g Guard) -> Range<'g, 'static, K, V> {
        self.range(Bound::Unbounded, Bound::Unbounded, guard)
    }
}

impl<K: Ord, V> Default for SkipList<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> Drop for SkipList<K, V> {
    fn drop(&mut self) {
        // Exclusive access: walk the bottom level and free every node,
        // head sentinel included. Retired nodes are handled by the epoch
        // collector.
        unsafe {
            let guard = epoch::unprotected();
            let mut curr = self.head.load(Ordering::Relaxed, guard);
            while !curr.is_null() {
                let next = curr.deref().next[0].load(Ordering::Relaxed, guard);
                drop(curr.into_owned());
                curr = next;
            }
        }
    }
}

fn lock_node<'g, K, V>(node: &'g Node<K, V>) -> MutexGuard<'g, ()> {
    match node.lock.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Iterator produced by [`SkipList::range`].
pub struct Range<'g, 'k, K, V> {
    current: Shared<'g, Node<K, V>>,
    upper: Bound<&'k K>,
    guard: &'g Guard,
}

impl<'g, 'k, K: Ord, V> Iterator for Range<'g, 'k, K, V> {
    type Item = Entry<'g, K, V>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = unsafe { self.current.as_ref() }?;
            self.current = node.next[0].load(Ordering::SeqCst, self.guard);
            let (k, v) = match (&node.key, &node.value) {
                (Some(k), Some(v)) => (k, v),
                _ => continue,
            };
            let in_range = match self.upper {
                Bound::Included(hi) => k <= hi,
                Bound::Excluded(hi) => k < hi,
                Bound::Unbounded => true,
            };
            if !in_range {
                self.current = Shared::null();
                return None;
            }
            if !node.fully_linked.load(Ordering::SeqCst) || node.marked.load(Ordering::SeqCst) {
                continue;
            }
            return Some(Entry { key: k, value: v });
        }
    }
}
