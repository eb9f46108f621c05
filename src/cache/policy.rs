//! Eviction policy state machines.
//!
//! Each cache bucket owns one [`PolicyState`] tracking exactly the keys
//! resident in that bucket's index. The cache calls `on_insert` /
//! `on_access` / `on_remove` under the bucket lock, and asks
//! [`PolicyState::evict_candidates`] for victims when the bucket is over
//! capacity. A policy must never return the `protect`ed key (the one
//! whose insertion triggered the eviction).
//!
//! The invariant checked by `validate_integrity` is that a policy
//! tracks precisely the bucket's resident keys: `len()` equals the
//! index length at every quiescent point. (ARC's ghost lists remember
//! *departed* keys by design; they are excluded from `len()`.)

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use rand::Rng;

/// Eviction strategy selector, chosen at cache creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Least-recently-used: evict the coldest by recency.
    #[default]
    Lru,
    /// Least-frequently-used: evict the minimum access count, ties
    /// broken by age.
    Lfu,
    /// First-in-first-out: evict by insertion order.
    Fifo,
    /// Uniform random choice.
    Random,
    /// Clock (second-chance): circular sweep over reference bits.
    Clock,
    /// Adaptive replacement: balances recency and frequency with ghost
    /// lists.
    Arc,
}

impl EvictionPolicy {
    /// Instantiates the per-bucket state machine for this policy.
    pub(crate) fn build(self, capacity: usize) -> Box<dyn PolicyState> {
        match self {
            Self::Lru => Box::new(LruState::new()),
            Self::Lfu => Box::new(LfuState::new()),
            Self::Fifo => Box::new(FifoState::new()),
            Self::Random => Box::new(RandomState::new()),
            Self::Clock => Box::new(ClockState::new()),
            Self::Arc => Box::new(ArcState::new(capacity)),
        }
    }
}

/// Per-bucket policy state. See the [module docs](self).
pub(crate) trait PolicyState: Send {
    /// A new key became resident.
    fn on_insert(&mut self, key: &[u8]);

    /// A resident key was read (or overwritten).
    fn on_access(&mut self, key: &[u8]);

    /// A resident key left the bucket (delete or expiry).
    fn on_remove(&mut self, key: &[u8]);

    /// Chooses up to `n` victims, removing them from the policy's own
    /// tracking. Must never include `protect`.
    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>>;

    /// Number of resident keys tracked.
    fn len(&self) -> usize;
}

// ------------------------------------------------------------------------------------------------
// LRU
// ------------------------------------------------------------------------------------------------

/// Recency list realised as a tick index: every touch re-stamps the key
/// with a fresh monotonic tick; the smallest tick is the LRU victim.
struct LruState {
    tick: u64,
    by_key: HashMap<Vec<u8>, u64>,
    by_tick: BTreeMap<u64, Vec<u8>>,
}

impl LruState {
    fn new() -> Self {
        Self {
            tick: 0,
            by_key: HashMap::new(),
            by_tick: BTreeMap::new(),
        }
    }

    fn touch(&mut self, key: &[u8]) {
        self.tick += 1;
        if let Some(old) = self.by_key.insert(key.to_vec(), self.tick) {
            self.by_tick.remove(&old);
        }
        self.by_tick.insert(self.tick, key.to_vec());
    }
}

impl PolicyState for LruState {
    fn on_insert(&mut self, key: &[u8]) {
        self.touch(key);
    }

    fn on_access(&mut self, key: &[u8]) {
        self.touch(key);
    }

    fn on_remove(&mut self, key: &[u8]) {
        if let Some(tick) = self.by_key.remove(key) {
            self.by_tick.remove(&tick);
        }
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some((&tick, key)) = self
                .by_tick
                .iter()
                .find(|(_, key)| key.as_slice() != protect)
            else {
                break;
            };
            let key = key.clone();
            self.by_tick.remove(&tick);
            self.by_key.remove(&key);
            out.push(key);
        }
        out
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }
}

// ------------------------------------------------------------------------------------------------
// LFU
// ------------------------------------------------------------------------------------------------

/// Frequency counter per key; eviction takes the minimum frequency,
/// breaking ties by insertion age (oldest first).
struct LfuState {
    order: u64,
    /// key → (frequency, insertion order)
    entries: HashMap<Vec<u8>, (u64, u64)>,
}

impl LfuState {
    fn new() -> Self {
        Self {
            order: 0,
            entries: HashMap::new(),
        }
    }
}

impl PolicyState for LfuState {
    fn on_insert(&mut self, key: &[u8]) {
        self.order += 1;
        self.entries.insert(key.to_vec(), (1, self.order));
    }

    fn on_access(&mut self, key: &[u8]) {
        if let Some((freq, _)) = self.entries.get_mut(key) {
            *freq += 1;
        }
    }

    fn on_remove(&mut self, key: &[u8]) {
        self.entries.remove(key);
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| key.as_slice() != protect)
                .min_by_key(|&(_, &(freq, order))| (freq, order))
                .map(|(key, _)| key.clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                    out.push(key);
                }
                None => break,
            }
        }
        out
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ------------------------------------------------------------------------------------------------
// FIFO
// ------------------------------------------------------------------------------------------------

/// Pure insertion order; access recency is ignored.
struct FifoState {
    queue: VecDeque<Vec<u8>>,
    resident: HashSet<Vec<u8>>,
}

impl FifoState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            resident: HashSet::new(),
        }
    }
}

impl PolicyState for FifoState {
    fn on_insert(&mut self, key: &[u8]) {
        if self.resident.insert(key.to_vec()) {
            self.queue.push_back(key.to_vec());
        }
    }

    fn on_access(&mut self, _key: &[u8]) {}

    fn on_remove(&mut self, key: &[u8]) {
        if self.resident.remove(key) {
            self.queue.retain(|k| k.as_slice() != key);
        }
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        let mut requeue = Vec::new();
        while out.len() < n {
            let Some(key) = self.queue.pop_front() else {
                break;
            };
            if key.as_slice() == protect {
                requeue.push(key);
                continue;
            }
            self.resident.remove(&key);
            out.push(key);
        }
        // Protected key returns to the front, keeping its age.
        for key in requeue.into_iter().rev() {
            self.queue.push_front(key);
        }
        out
    }

    fn len(&self) -> usize {
        self.resident.len()
    }
}

// ------------------------------------------------------------------------------------------------
// RANDOM
// ------------------------------------------------------------------------------------------------

/// Uniform random eviction.
struct RandomState {
    keys: Vec<Vec<u8>>,
    positions: HashMap<Vec<u8>, usize>,
}

impl RandomState {
    fn new() -> Self {
        Self {
            keys: Vec::new(),
            positions: HashMap::new(),
        }
    }

    fn remove_at(&mut self, idx: usize) -> Vec<u8> {
        let key = self.keys.swap_remove(idx);
        self.positions.remove(&key);
        if idx < self.keys.len() {
            self.positions.insert(self.keys[idx].clone(), idx);
        }
        key
    }
}

impl PolicyState for RandomState {
    fn on_insert(&mut self, key: &[u8]) {
        if !self.positions.contains_key(key) {
            self.positions.insert(key.to_vec(), self.keys.len());
            self.keys.push(key.to_vec());
        }
    }

    fn on_access(&mut self, _key: &[u8]) {}

    fn on_remove(&mut self, key: &[u8]) {
        if let Some(idx) = self.positions.remove(key) {
            self.keys.swap_remove(idx);
            if idx < self.keys.len() {
                self.positions.insert(self.keys[idx].clone(), idx);
            }
        }
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut rng = rand::rng();
        let mut out = Vec::with_capacity(n);
        while out.len() < n && !self.keys.is_empty() {
            if self.keys.len() == 1 && self.keys[0].as_slice() == protect {
                break;
            }
            let idx = rng.random_range(0..self.keys.len());
            if self.keys[idx].as_slice() == protect {
                continue;
            }
            out.push(self.remove_at(idx));
        }
        out
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

// ------------------------------------------------------------------------------------------------
// CLOCK
// ------------------------------------------------------------------------------------------------

struct ClockSlot {
    key: Vec<u8>,
    referenced: bool,
}

/// Second-chance: a circular hand sweeps slots, clearing reference bits
/// until it lands on an unreferenced slot to evict.
struct ClockState {
    slots: Vec<ClockSlot>,
    positions: HashMap<Vec<u8>, usize>,
    hand: usize,
}

impl ClockState {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            positions: HashMap::new(),
            hand: 0,
        }
    }

    fn remove_at(&mut self, idx: usize) -> Vec<u8> {
        let slot = self.slots.swap_remove(idx);
        self.positions.remove(&slot.key);
        if idx < self.slots.len() {
            self.positions.insert(self.slots[idx].key.clone(), idx);
        }
        if self.hand >= self.slots.len() {
            self.hand = 0;
        }
        slot.key
    }
}

impl PolicyState for ClockState {
    fn on_insert(&mut self, key: &[u8]) {
        if !self.positions.contains_key(key) {
            self.positions.insert(key.to_vec(), self.slots.len());
            self.slots.push(ClockSlot {
                key: key.to_vec(),
                referenced: false,
            });
        }
    }

    fn on_access(&mut self, key: &[u8]) {
        if let Some(&idx) = self.positions.get(key) {
            self.slots[idx].referenced = true;
        }
    }

    fn on_remove(&mut self, key: &[u8]) {
        if let Some(idx) = self.positions.get(key).copied() {
            self.remove_at(idx);
        }
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n && !self.slots.is_empty() {
            if self.slots.len() == 1 && self.slots[0].key.as_slice() == protect {
                break;
            }
            // One full sweep clears every referenced bit, so a victim is
            // found within two revolutions.
            let idx = self.hand % self.slots.len();
            let slot = &mut self.slots[idx];
            if slot.key.as_slice() == protect || slot.referenced {
                slot.referenced = false;
                self.hand = (idx + 1) % self.slots.len();
                continue;
            }
            out.push(self.remove_at(idx));
        }
        out
    }

    fn len(&self) -> usize {
        self.slots.len()
    }
}

// ------------------------------------------------------------------------------------------------
// ARC
// ------------------------------------------------------------------------------------------------

/// Adaptive Replacement Cache.
///
/// Two resident lists — T1 (seen once recently) and T2 (seen at least
/// twice) — plus ghost lists B1/B2 remembering recently evicted keys.
/// A ghost hit signals the adaptive parameter `p` to grow (B1 hit:
/// recency is winning) or shrink (B2 hit: frequency is winning), which
/// steers the next replacement to the other list.
struct ArcState {
    capacity: usize,
    /// Target size for T1.
    p: usize,
    t1: VecDeque<Vec<u8>>,
    t2: VecDeque<Vec<u8>>,
    b1: VecDeque<Vec<u8>>,
    b2: VecDeque<Vec<u8>>,
    /// Pending victims chosen by `replace` during `on_insert`, handed
    /// out at the next `evict_candidates` call.
    pending: Vec<Vec<u8>>,
}

impl ArcState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            p: 0,
            t1: VecDeque::new(),
            t2: VecDeque::new(),
            b1: VecDeque::new(),
            b2: VecDeque::new(),
            pending: Vec::new(),
        }
    }

    fn list_remove(list: &mut VecDeque<Vec<u8>>, key: &[u8]) -> bool {
        if let Some(idx) = list.iter().position(|k| k.as_slice() == key) {
            list.remove(idx);
            true
        } else {
            false
        }
    }

    /// Moves the LRU of T1 or T2 to its ghost list, queueing the key as
    /// a pending victim. `from_b2` is the ARC paper's tie-break.
    fn replace(&mut self, from_b2: bool) {
        let take_t1 = !self.t1.is_empty()
            && (self.t1.len() > self.p || (from_b2 && self.t1.len() == self.p));
        if take_t1 {
            if let Some(victim) = self.t1.pop_front() {
                self.b1.push_back(victim.clone());
                self.pending.push(victim);
            }
        } else if let Some(victim) = self.t2.pop_front() {
            self.b2.push_back(victim.clone());
            self.pending.push(victim);
        } else if let Some(victim) = self.t1.pop_front() {
            self.b1.push_back(victim.clone());
            self.pending.push(victim);
        }
        // Bound the ghosts: |T1|+|B1| ≤ c, everything ≤ 2c.
        while self.t1.len() + self.b1.len() > self.capacity {
            self.b1.pop_front();
        }
        while self.t1.len() + self.t2.len() + self.b1.len() + self.b2.len() > 2 * self.capacity {
            if self.b2.pop_front().is_none() {
                break;
            }
        }
    }
}

impl PolicyState for ArcState {
    fn on_insert(&mut self, key: &[u8]) {
        let resident = self.t1.len() + self.t2.len();

        if Self::list_remove(&mut self.b1, key) {
            // Ghost hit in B1 → recency is under-served, grow p.
            let delta = (self.b2.len() / self.b1.len().max(1)).max(1);
            self.p = (self.p + delta).min(self.capacity);
            if resident >= self.capacity {
                self.replace(false);
            }
            self.t2.push_back(key.to_vec());
        } else if Self::list_remove(&mut self.b2, key) {
            // Ghost hit in B2 → frequency is under-served, shrink p.
            let delta = (self.b1.len() / self.b2.len().max(1)).max(1);
            self.p = self.p.saturating_sub(delta);
            if resident >= self.capacity {
                self.replace(true);
            }
            self.t2.push_back(key.to_vec());
        } else {
            if resident >= self.capacity {
                self.replace(false);
            }
            self.t1.push_back(key.to_vec());
        }
    }

    fn on_access(&mut self, key: &[u8]) {
        // A hit promotes to (or refreshes) the MRU end of T2.
        if Self::list_remove(&mut self.t1, key) || Self::list_remove(&mut self.t2, key) {
            self.t2.push_back(key.to_vec());
        }
    }

    fn on_remove(&mut self, key: &[u8]) {
        let _ = Self::list_remove(&mut self.t1, key)
            || Self::list_remove(&mut self.t2, key)
            || Self::list_remove(&mut self.b1, key)
            || Self::list_remove(&mut self.b2, key);
        self.pending.retain(|k| k.as_slice() != key);
    }

    fn evict_candidates(&mut self, n: usize, protect: &[u8]) -> Vec<Vec<u8>> {
        let mut out: Vec<Vec<u8>> = std::mem::take(&mut self.pending);
        while out.len() < n {
            let before = out.len();
            self.replace(false);
            out.append(&mut self.pending);
            if out.len() == before {
                break; // both lists empty
            }
        }
        out.retain(|k| k.as_slice() != protect);
        out
    }

    fn len(&self) -> usize {
        self.t1.len() + self.t2.len()
    }
}
