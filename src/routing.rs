// C6: Routing table — immutable snapshot, published copy-on-write.
//
// A RoutingTable maps key prefixes to dictionaries and dictionary ids to
// their metadata. It is built once by `scan_dict_dir`, installed into a
// single atomic pointer by one publisher, and never mutated afterward.
// Readers load the pointer with acquire semantics and are guaranteed the
// table they see lives for the duration of one operation; a cool-off period
// (C7) bounds how long a retired table must be kept alive for that to hold.

use crate::dict::meta::{self, DictId, DictMeta, DEFAULT_PREFIX};
use crate::error::Result;
use crate::pool::DictPool;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

const ID_SPACE: usize = 1 << 16;

#[derive(Debug, Clone)]
pub struct NamespaceEntry {
    pub prefix: String,
    /// Newest first; at most `dict_retain_max` entries. `dicts[0]` is the
    /// active dictionary for this prefix.
    pub dicts: Vec<DictMeta>,
}

pub struct RoutingTable {
    pub namespaces: Vec<NamespaceEntry>,
    by_id: Box<[Option<DictMeta>]>,
    pub built_at: u64,
    pub generation: u64,
}

impl RoutingTable {
    pub fn empty(generation: u64) -> Self {
        Self {
            namespaces: Vec::new(),
            by_id: (0..ID_SPACE).map(|_| None).collect(),
            built_at: meta::now_epoch_s(),
            generation,
        }
    }

    /// Longest-prefix match across namespaces; returns the head (active)
    /// dict of the winning namespace, falling back to "default" if present.
    pub fn pick_dict(&self, key: &[u8]) -> Option<&DictMeta> {
        let mut best: Option<&NamespaceEntry> = None;
        for ns in &self.namespaces {
            if ns.prefix == DEFAULT_PREFIX {
                continue;
            }
            if key.starts_with(ns.prefix.as_bytes()) {
                if best.map(|b| ns.prefix.len() > b.prefix.len()).unwrap_or(true) {
                    best = Some(ns);
                }
            }
        }
        let winner = best.or_else(|| self.namespaces.iter().find(|ns| ns.prefix == DEFAULT_PREFIX))?;
        winner.dicts.first()
    }

    pub fn lookup_by_id(&self, id: DictId) -> Option<&DictMeta> {
        self.by_id[id as usize].as_ref()
    }

    pub fn has_default(&self) -> bool {
        self.namespaces
            .iter()
            .any(|ns| ns.prefix == DEFAULT_PREFIX && !ns.dicts.is_empty())
    }

    /// All DictMeta in this table, flattened, for release-to-pool on reclamation.
    pub fn all_dicts(&self) -> impl Iterator<Item = &DictMeta> {
        self.namespaces.iter().flat_map(|ns| ns.dicts.iter())
    }
}

/// Rebuild a RoutingTable from the dict directory: list numeric dict files,
/// parse manifests, retain compiled handles via the pool, group by prefix
/// (newest-first, truncated to `max_per_ns`), and build the id direct array.
pub fn scan_dict_dir(
    dir: &Path,
    max_per_ns: usize,
    pool: &DictPool,
    generation: u64,
) -> Result<RoutingTable> {
    let ids = meta::scan_ids(dir)?;
    let mut by_prefix: HashMap<String, Vec<DictMeta>> = HashMap::new();

    for id in ids {
        let mut dict_meta = match meta::load_meta(dir, id) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if !dict_meta.is_active() {
            continue;
        }
        pool.retain_for_meta(&mut dict_meta)?;

        for prefix in dict_meta.effective_prefixes() {
            by_prefix.entry(prefix).or_default().push(dict_meta.clone());
        }
    }

    let mut namespaces = Vec::with_capacity(by_prefix.len());
    for (prefix, mut dicts) in by_prefix {
        dicts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        dicts.truncate(max_per_ns);
        namespaces.push(NamespaceEntry { prefix, dicts });
    }
    namespaces.sort_by(|a, b| a.prefix.cmp(&b.prefix));

    let mut table = RoutingTable::empty(generation);
    // Newest wins on id collision (should not happen, defensive only): since
    // each namespace is already newest-first, later (older) entries for the
    // same id simply don't overwrite an existing slot.
    for ns in &namespaces {
        for dict_meta in &ns.dicts {
            let slot = &mut table.by_id[dict_meta.id as usize];
            if slot.is_none() {
                *slot = Some(dict_meta.clone());
            }
        }
    }
    table.namespaces = namespaces;
    Ok(table)
}

/// Monotonic generation counter for the single publisher.
pub struct GenerationCounter(AtomicU64);

impl GenerationCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for GenerationCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// The single atomic pointer readers and the publisher synchronize through.
///
/// Per spec §5/§9 this uses a cool-off bound rather than epoch-based
/// reclamation: the publisher's `publish` is a plain atomic swap (it is the
/// sole writer), readers load with acquire and must not hold the reference
/// past one operation, and the table this call replaced is handed to the
/// caller to enqueue on the GC's retired-table queue (C7).
pub struct RoutingTableHandle {
    ptr: AtomicPtr<RoutingTable>,
    generation: GenerationCounter,
}

impl RoutingTableHandle {
    pub fn new(initial: RoutingTable) -> Self {
        let generation = GenerationCounter::new();
        // initial.generation is expected to already be 1; keep the counter
        // in lockstep so the next publish() produces generation 2.
        generation.next();
        let raw = Box::into_raw(Box::new(initial));
        Self {
            ptr: AtomicPtr::new(raw),
            generation,
        }
    }

    /// Borrow the current table. Valid for the duration of one operation —
    /// the cool-off period is the bound that makes this safe without
    /// hazard pointers (see module docs).
    pub fn current(&self) -> &RoutingTable {
        // Safety: the pointed-to table is only freed by the GC after
        // gc_cool_period has elapsed since it was retired.
        unsafe { &*self.ptr.load(Ordering::Acquire) }
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.next()
    }

    /// Install `new_table`, returning a raw pointer to the table it
    /// replaced. The caller enqueues that pointer onto the GC's retired
    /// queue rather than freeing it directly.
    pub fn publish(&self, new_table: RoutingTable) -> *mut RoutingTable {
        let raw = Box::into_raw(Box::new(new_table));
        self.ptr.swap(raw, Ordering::AcqRel)
    }
}

// Safety: all access to `ptr` goes through atomic load/swap; the pointee is
// freed exactly once, by the GC, after the cool-off period.
unsafe impl Send for RoutingTableHandle {}
unsafe impl Sync for RoutingTableHandle {}

impl Drop for RoutingTableHandle {
    fn drop(&mut self) {
        let raw = self.ptr.load(Ordering::Acquire);
        if !raw.is_null() {
            // Safety: we're the sole owner during drop.
            unsafe {
                drop(Box::from_raw(raw));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dict::meta::persist_new_dict;

    fn train_fixture_bytes() -> Vec<u8> {
        let samples: Vec<Vec<u8>> = (0..200)
            .map(|i| format!("{{\"type\":\"order\",\"id\":{i},\"status\":\"ok\"}}").into_bytes())
            .collect();
        zstd::dict::from_samples(&samples, 8192).unwrap()
    }

    #[test]
    fn prefix_routing_matches_scenario_2() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = train_fixture_bytes();
        persist_new_dict(dir.path(), 5, &bytes, 3, vec!["user:".into()]).unwrap();
        persist_new_dict(dir.path(), 7, &bytes, 3, vec!["log:".into()]).unwrap();

        let pool = DictPool::new();
        let table = scan_dict_dir(dir.path(), 3, &pool, 1).unwrap();

        assert_eq!(table.pick_dict(b"user:42").unwrap().id, 5);
        assert!(table.pick_dict(b"logbook").is_none());
        assert_eq!(table.pick_dict(b"log:abc").unwrap().id, 7);
    }

    #[test]
    fn dict_retain_max_is_enforced_and_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = train_fixture_bytes();
        for id in 1..=5u16 {
            persist_new_dict(dir.path(), id, &bytes, 3, vec![]).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(1100));
        }

        let pool = DictPool::new();
        let table = scan_dict_dir(dir.path(), 3, &pool, 1).unwrap();
        let default_ns = table
            .namespaces
            .iter()
            .find(|ns| ns.prefix == DEFAULT_PREFIX)
            .unwrap();

        assert!(default_ns.dicts.len() <= 3);
        for w in default_ns.dicts.windows(2) {
            assert!(w[0].created_at >= w[1].created_at);
        }
    }

    #[test]
    fn lookup_by_id_is_present_after_scan() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = train_fixture_bytes();
        persist_new_dict(dir.path(), 42, &bytes, 3, vec![]).unwrap();

        let pool = DictPool::new();
        let table = scan_dict_dir(dir.path(), 3, &pool, 1).unwrap();
        assert_eq!(table.lookup_by_id(42).unwrap().id, 42);
        assert!(table.lookup_by_id(43).is_none());
    }

    #[test]
    fn publication_generation_is_monotonic() {
        let handle = RoutingTableHandle::new(RoutingTable::empty(1));
        assert_eq!(handle.current().generation, 1);

        let gen2 = handle.next_generation();
        let old = handle.publish(RoutingTable::empty(gen2));
        assert_eq!(handle.current().generation, gen2);
        assert!(gen2 > 1);

        // Safety: this table was just replaced and nothing else references it.
        unsafe { drop(Box::from_raw(old)) };
    }

    #[test]
    fn publish_same_table_twice_is_idempotent() {
        let handle = RoutingTableHandle::new(RoutingTable::empty(1));
        let gen2 = handle.next_generation();

        let old1 = handle.publish(RoutingTable::empty(gen2));
        unsafe { drop(Box::from_raw(old1)) };
        let gen_after_first = handle.current().generation;

        let gen3 = handle.next_generation();
        let old2 = handle.publish(RoutingTable::empty(gen3));
        unsafe { drop(Box::from_raw(old2)) };

        assert!(handle.current().generation >= gen_after_first);
    }
}
