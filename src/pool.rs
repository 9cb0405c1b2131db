// C5: Shared dictionary pool.
//
// A process-wide map from a dictionary's canonical on-disk path to its
// compiled compressor/decompressor handles and a reference count. Compiling
// a zstd dictionary is comparatively expensive, so handles are shared across
// every RoutingTable generation that still references the same dict — only
// publication and retirement touch the pool, never the hot path.

use crate::dict::meta::{read_dict_bytes, DictMeta};
use crate::error::Result;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub struct CompiledHandles {
    pub encoder: zstd::dict::EncoderDictionary<'static>,
    pub decoder: zstd::dict::DecoderDictionary<'static>,
}

struct PoolEntry {
    handles: Arc<CompiledHandles>,
    refcount: usize,
}

pub struct DictPool {
    entries: Mutex<HashMap<PathBuf, PoolEntry>>,
}

impl DictPool {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn key_for(meta: &DictMeta) -> PathBuf {
        meta.dict_path.clone()
    }

    /// If an entry already exists for this dict's path, bump its refcount
    /// and hand back the existing handles. Otherwise compile fresh handles
    /// from the dict bytes on disk and insert a new entry with refcount 1.
    pub fn retain_for_meta(&self, meta: &mut DictMeta) -> Result<()> {
        let key = Self::key_for(meta);
        let mut entries = self.entries.lock();

        if let Some(entry) = entries.get_mut(&key) {
            entry.refcount += 1;
            meta.handles = Some(entry.handles.clone());
            return Ok(());
        }

        let bytes = read_dict_bytes(meta)?;
        let encoder = zstd::dict::EncoderDictionary::copy(&bytes, meta.level);
        let decoder = zstd::dict::DecoderDictionary::copy(&bytes);
        let handles = Arc::new(CompiledHandles { encoder, decoder });

        entries.insert(
            key,
            PoolEntry {
                handles: handles.clone(),
                refcount: 1,
            },
        );
        meta.handles = Some(handles);
        Ok(())
    }

    /// Decrement the refcount for this dict's entry; when it reaches zero,
    /// the compiled handles are dropped along with the entry.
    pub fn release_for_meta(&self, meta: &DictMeta) {
        let key = Self::key_for(meta);
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.refcount = entry.refcount.saturating_sub(1);
            if entry.refcount == 0 {
                entries.remove(&key);
            }
        }
    }

    pub fn refcount_for_meta(&self, meta: &DictMeta) -> usize {
        let key = Self::key_for(meta);
        self.entries
            .lock()
            .get(&key)
            .map(|e| e.refcount)
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

impl Default for DictPool {
    fn default() -> Self {
        Self::new()
    }
}
