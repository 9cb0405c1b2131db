// C4: Dictionary metadata and on-disk layout.

pub mod meta;

pub use meta::{DictId, DictMeta, DEFAULT_PREFIX};
