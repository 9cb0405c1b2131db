// Runtime configuration for the dictionary-compression core.
//
// The core does not own a CLI or INI loader (that's an external
// collaborator); it owns the `Config` type, its defaults, and the validation
// policy a loader is expected to apply before handing the struct over.

use crate::error::DcError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Copy, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainMode {
    Fast,
    Optimize,
}

impl Default for TrainMode {
    fn default() -> Self {
        TrainMode::Fast
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub enable_comp: bool,
    pub enable_dict: bool,
    pub dict_dir: String,
    pub dict_size: usize,
    pub zstd_level: i32,
    pub min_comp_size: usize,
    pub max_comp_size: usize,

    pub enable_training: bool,
    pub retraining_interval_s: u64,
    pub min_training_size: usize,
    pub ewma_alpha: f64,
    pub retrain_drop: f64,
    pub train_mode: TrainMode,
    pub dict_retain_max: usize,

    pub gc_cool_period_s: u64,
    pub gc_quarantine_period_s: u64,

    pub enable_sampling: bool,
    pub sample_p: f64,
    pub sample_window_duration_s: u64,
    pub spool_dir: String,
    pub spool_max_bytes: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_comp: true,
            enable_dict: true,
            dict_dir: "./dicts".to_string(),
            dict_size: 64 * 1024,
            zstd_level: 3,
            min_comp_size: 32,
            max_comp_size: 1 << 20,

            enable_training: true,
            retraining_interval_s: 3600,
            min_training_size: 1 << 20,
            ewma_alpha: 0.2,
            retrain_drop: 0.1,
            train_mode: TrainMode::Fast,
            dict_retain_max: 3,

            gc_cool_period_s: 3600,
            gc_quarantine_period_s: 86400,

            enable_sampling: true,
            sample_p: 0.01,
            sample_window_duration_s: 0,
            spool_dir: "./spool".to_string(),
            spool_max_bytes: 64 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Sanity checks applied at startup. On failure the caller's documented
    /// policy (spec §7 `ConfigInvalid`) is to disable compression and
    /// dictionary use and start in pass-through mode rather than abort, but
    /// this function only reports the problem — the decision to degrade
    /// gracefully is the loader's.
    pub fn validate(&self) -> Result<(), DcError> {
        if self.min_comp_size > self.max_comp_size {
            return Err(DcError::ConfigInvalid(format!(
                "min_comp_size ({}) > max_comp_size ({})",
                self.min_comp_size, self.max_comp_size
            )));
        }
        if !(1..=22).contains(&self.zstd_level) {
            return Err(DcError::ConfigInvalid(format!(
                "zstd_level {} out of range 1..22",
                self.zstd_level
            )));
        }
        if self.dict_size == 0 {
            return Err(DcError::ConfigInvalid("dict_size must be > 0".into()));
        }
        if !(0.0..=1.0).contains(&self.ewma_alpha) {
            return Err(DcError::ConfigInvalid("ewma_alpha must be in 0..1".into()));
        }
        if !(0.0..=1.0).contains(&self.retrain_drop) {
            return Err(DcError::ConfigInvalid("retrain_drop must be in 0..1".into()));
        }
        if !(0.0..=1.0).contains(&self.sample_p) {
            return Err(DcError::ConfigInvalid("sample_p must be in 0..1".into()));
        }
        if self.dict_retain_max == 0 {
            return Err(DcError::ConfigInvalid("dict_retain_max must be > 0".into()));
        }
        Ok(())
    }

    pub fn gc_cool_period(&self) -> Duration {
        Duration::from_secs(self.gc_cool_period_s)
    }

    pub fn gc_quarantine_period(&self) -> Duration {
        Duration::from_secs(self.gc_quarantine_period_s)
    }

    pub fn retraining_interval(&self) -> Duration {
        Duration::from_secs(self.retraining_interval_s)
    }

    pub fn sample_window(&self) -> Duration {
        Duration::from_secs(self.sample_window_duration_s)
    }
}

/// Parse a byte-size value with an optional K/M/G suffix (decimal, SI-1024:
/// K=1024, M=1024^2, G=1024^3). A bare number is bytes.
pub fn parse_size(s: &str) -> Result<u64, DcError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DcError::ConfigInvalid("empty size value".into()));
    }
    let (digits, mul) = match s.chars().last().unwrap() {
        'k' | 'K' => (&s[..s.len() - 1], 1024u64),
        'm' | 'M' => (&s[..s.len() - 1], 1024 * 1024),
        'g' | 'G' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| DcError::ConfigInvalid(format!("invalid size value: {s}")))?;
    n.checked_mul(mul)
        .ok_or_else(|| DcError::ConfigInvalid(format!("size value overflows: {s}")))
}

/// Parse a duration value with an optional s/m/h suffix. A bare number is
/// seconds.
pub fn parse_duration_secs(s: &str) -> Result<u64, DcError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(DcError::ConfigInvalid("empty duration value".into()));
    }
    let (digits, mul) = match s.chars().last().unwrap() {
        's' => (&s[..s.len() - 1], 1u64),
        'm' => (&s[..s.len() - 1], 60),
        'h' => (&s[..s.len() - 1], 3600),
        _ => (s, 1),
    };
    let n: u64 = digits
        .trim()
        .parse()
        .map_err(|_| DcError::ConfigInvalid(format!("invalid duration value: {s}")))?;
    n.checked_mul(mul)
        .ok_or_else(|| DcError::ConfigInvalid(format!("duration value overflows: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_inverted_size_bounds() {
        let mut c = Config::default();
        c.min_comp_size = 100;
        c.max_comp_size = 10;
        assert!(c.validate().is_err());
    }

    #[test]
    fn parses_size_suffixes() {
        assert_eq!(parse_size("128").unwrap(), 128);
        assert_eq!(parse_size("64K").unwrap(), 64 * 1024);
        assert_eq!(parse_size("2M").unwrap(), 2 * 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert!(parse_size("").is_err());
        assert!(parse_size("abc").is_err());
    }

    #[test]
    fn parses_duration_suffixes() {
        assert_eq!(parse_duration_secs("30").unwrap(), 30);
        assert_eq!(parse_duration_secs("45s").unwrap(), 45);
        assert_eq!(parse_duration_secs("5m").unwrap(), 300);
        assert_eq!(parse_duration_secs("2h").unwrap(), 7200);
    }
}
