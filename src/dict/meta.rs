// C4: Dictionary metadata & on-disk layout.
//
// Binds raw dictionary bytes on disk to a manifest (created/retired
// timestamps, prefixes, a compression level hint) and, once compiled, to the
// pool's compressor/decompressor handles. Both the dict file and its
// manifest are written atomically: temp file in the same directory, fsync,
// rename, fsync the directory.

use crate::error::{DcError, Result};
use crate::pool::CompiledHandles;
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_PREFIX: &str = "default";

/// Numeric dictionary id. 0 is reserved for "no dictionary"; valid ids
/// occupy 1..=65535.
pub type DictId = u16;

#[derive(Debug, Clone)]
pub struct DictMeta {
    pub id: DictId,
    pub dict_path: PathBuf,
    pub manifest_path: PathBuf,
    pub created_at: u64,
    /// 0 means active (not yet retired).
    pub retired_at: u64,
    pub level: i32,
    pub signature: Option<String>,
    /// Empty means the synthetic "default" namespace.
    pub prefixes: Vec<String>,
    pub size_bytes: u64,
    pub handles: Option<Arc<CompiledHandles>>,
}

impl DictMeta {
    pub fn is_active(&self) -> bool {
        self.retired_at == 0
    }

    pub fn effective_prefixes(&self) -> Vec<String> {
        if self.prefixes.is_empty() {
            vec![DEFAULT_PREFIX.to_string()]
        } else {
            self.prefixes.clone()
        }
    }
}

/// Parsed manifest fields, before they're joined with a dict file's size and
/// compiled handles to make a [`DictMeta`].
struct ManifestFields {
    id: DictId,
    created_at: u64,
    retired_at: u64,
    level: i32,
    signature: Option<String>,
    prefixes: Vec<String>,
}

fn rfc3339(epoch_s: u64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_s as i64, 0)
        .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).unwrap())
        .to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_rfc3339(s: &str) -> Option<u64> {
    if s.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).timestamp().max(0) as u64)
}

fn format_manifest(f: &ManifestFields) -> String {
    format!(
        "id={}\ncreated={}\nretired={}\nlevel={}\nsignature={}\nprefixes={}\n",
        f.id,
        rfc3339(f.created_at),
        if f.retired_at == 0 { String::new() } else { rfc3339(f.retired_at) },
        f.level,
        f.signature.clone().unwrap_or_default(),
        f.prefixes.join(","),
    )
}

fn parse_manifest(text: &str) -> Result<ManifestFields> {
    let mut id = None;
    let mut created_at = 0u64;
    let mut retired_at = 0u64;
    let mut level = 3i32;
    let mut signature = None;
    let mut prefixes = Vec::new();

    for line in text.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key {
            "id" => {
                id = value
                    .parse::<DictId>()
                    .map_err(|_| DcError::InvalidArg(format!("bad manifest id: {value}")))
                    .ok()
            }
            "created" => created_at = parse_rfc3339(value).unwrap_or(0),
            "retired" => retired_at = parse_rfc3339(value).unwrap_or(0),
            "level" => level = value.parse().unwrap_or(3),
            "signature" => {
                if !value.is_empty() {
                    signature = Some(value.to_string());
                }
            }
            "prefixes" => {
                prefixes = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            _ => {}
        }
    }

    let id = id.ok_or_else(|| DcError::InvalidArg("manifest missing id".into()))?;
    Ok(ManifestFields {
        id,
        created_at,
        retired_at,
        level,
        signature,
        prefixes,
    })
}

/// Write `contents` atomically into `final_path`: temp file in the same
/// directory, fsync the file, rename, fsync the directory.
pub fn atomic_write(final_path: &Path, contents: &[u8]) -> Result<()> {
    let dir = final_path
        .parent()
        .ok_or_else(|| DcError::InvalidArg("path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        final_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("dict"),
        std::process::id()
    ));

    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(contents)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, final_path)?;

    let dir_handle = File::open(dir)?;
    dir_handle.sync_all()?;
    Ok(())
}

pub fn dict_filename(id: DictId) -> String {
    format!("{id:05}.dict")
}

pub fn manifest_filename(id: DictId) -> String {
    format!("{id:05}.manifest")
}

/// Persist a freshly-trained dictionary: write the raw bytes and its
/// manifest, both atomically, then return the resulting metadata (without
/// compiled handles — the caller retains those via the pool separately).
pub fn persist_new_dict(
    dict_dir: &Path,
    id: DictId,
    bytes: &[u8],
    level: i32,
    prefixes: Vec<String>,
) -> Result<DictMeta> {
    let now = now_epoch_s();
    let dict_path = dict_dir.join(dict_filename(id));
    let manifest_path = dict_dir.join(manifest_filename(id));

    atomic_write(&dict_path, bytes)?;

    let fields = ManifestFields {
        id,
        created_at: now,
        retired_at: 0,
        level,
        signature: None,
        prefixes: prefixes.clone(),
    };
    atomic_write(&manifest_path, format_manifest(&fields).as_bytes())?;

    Ok(DictMeta {
        id,
        dict_path,
        manifest_path,
        created_at: now,
        retired_at: 0,
        level,
        signature: None,
        prefixes,
        size_bytes: bytes.len() as u64,
        handles: None,
    })
}

/// Mark a dict retired: rewrite only the manifest with `retired_at = now`.
/// The dict file itself stays on disk until quarantine elapses (C7).
pub fn retire(meta: &mut DictMeta) -> Result<()> {
    let now = now_epoch_s();
    let fields = ManifestFields {
        id: meta.id,
        created_at: meta.created_at,
        retired_at: now,
        level: meta.level,
        signature: meta.signature.clone(),
        prefixes: meta.prefixes.clone(),
    };
    atomic_write(&meta.manifest_path, format_manifest(&fields).as_bytes())?;
    meta.retired_at = now;
    Ok(())
}

/// Load one dict's manifest + file size from disk, without compiling handles.
pub fn load_meta(dict_dir: &Path, id: DictId) -> Result<DictMeta> {
    let dict_path = dict_dir.join(dict_filename(id));
    let manifest_path = dict_dir.join(manifest_filename(id));

    let mut text = String::new();
    OpenOptions::new()
        .read(true)
        .open(&manifest_path)?
        .read_to_string(&mut text)?;
    let fields = parse_manifest(&text)?;

    let size_bytes = fs::metadata(&dict_path)?.len();

    Ok(DictMeta {
        id: fields.id,
        dict_path,
        manifest_path,
        created_at: fields.created_at,
        retired_at: fields.retired_at,
        level: fields.level,
        signature: fields.signature,
        prefixes: fields.prefixes,
        size_bytes,
        handles: None,
    })
}

pub fn read_dict_bytes(meta: &DictMeta) -> Result<Vec<u8>> {
    Ok(fs::read(&meta.dict_path)?)
}

pub fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Numeric basenames of regular files directly under `dir` (ignores
/// subdirectories and non-numeric names). Each id appears once even though
/// both a `.dict` and a `.manifest` file share it.
pub fn scan_ids(dir: &Path) -> Result<Vec<DictId>> {
    let mut ids = std::collections::BTreeSet::new();
    if !dir.exists() {
        return Ok(Vec::new());
    }
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(stem) = Path::new(&name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Ok(id) = stem.parse::<DictId>() {
            ids.insert(id);
        }
    }
    Ok(ids.into_iter().collect())
}

/// Pick the smallest id in 1..65535 not currently used by any id in
/// `active_ids`, and not retired more recently than `quarantine` seconds
/// ago (per `retired_lookup`). Fails with `IdExhaustion` if none is free.
pub fn allocate_id(
    active_ids: &std::collections::HashSet<DictId>,
    retired_lookup: impl Fn(DictId) -> Option<u64>,
    quarantine_s: u64,
    now_s: u64,
) -> Result<DictId> {
    for candidate in 1u16..=u16::MAX {
        if active_ids.contains(&candidate) {
            continue;
        }
        if let Some(retired_at) = retired_lookup(candidate) {
            if now_s.saturating_sub(retired_at) < quarantine_s {
                continue;
            }
        }
        return Ok(candidate);
    }
    Err(DcError::IdExhaustion)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let meta = persist_new_dict(
            dir.path(),
            7,
            b"pretend-dictionary-bytes",
            5,
            vec!["user:".to_string()],
        )
        .unwrap();

        let loaded = load_meta(dir.path(), 7).unwrap();
        assert_eq!(loaded.id, 7);
        assert_eq!(loaded.level, 5);
        assert_eq!(loaded.prefixes, vec!["user:".to_string()]);
        assert!(loaded.is_active());
        assert_eq!(loaded.size_bytes, meta.size_bytes);
    }

    #[test]
    fn empty_prefixes_become_default_on_lookup() {
        let dir = tempfile::tempdir().unwrap();
        persist_new_dict(dir.path(), 1, b"x", 3, vec![]).unwrap();
        let loaded = load_meta(dir.path(), 1).unwrap();
        assert_eq!(loaded.effective_prefixes(), vec![DEFAULT_PREFIX.to_string()]);
    }

    #[test]
    fn retire_rewrites_only_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = persist_new_dict(dir.path(), 3, b"bytes", 3, vec![]).unwrap();
        let dict_bytes_before = fs::read(&meta.dict_path).unwrap();

        retire(&mut meta).unwrap();
        assert!(!meta.is_active());

        let dict_bytes_after = fs::read(&meta.dict_path).unwrap();
        assert_eq!(dict_bytes_before, dict_bytes_after);

        let reloaded = load_meta(dir.path(), 3).unwrap();
        assert!(!reloaded.is_active());
    }

    #[test]
    fn scan_ids_ignores_non_numeric_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        persist_new_dict(dir.path(), 2, b"a", 3, vec![]).unwrap();
        persist_new_dict(dir.path(), 9, b"b", 3, vec![]).unwrap();
        fs::create_dir(dir.path().join("42")).unwrap();
        fs::write(dir.path().join("notanumber.txt"), b"z").unwrap();

        let ids = scan_ids(dir.path()).unwrap();
        assert_eq!(ids, vec![2, 9]);
    }

    #[test]
    fn allocate_id_skips_active_and_quarantined() {
        let active: std::collections::HashSet<DictId> = [1, 2].into_iter().collect();
        let id = allocate_id(&active, |id| if id == 3 { Some(100) } else { None }, 50, 120).unwrap();
        assert_eq!(id, 3); // quarantine (50s) already elapsed by t=120

        let id2 = allocate_id(&active, |id| if id == 3 { Some(100) } else { None }, 50, 110).unwrap();
        assert_eq!(id2, 4); // id 3 still quarantined at t=110
    }
}
