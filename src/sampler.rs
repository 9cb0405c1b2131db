// C3: Sampler spooler.
//
// Bernoulli-samples key/value pairs and persists them to a size/time-capped
// append-only file for offline corpus analysis. One consumer thread per
// spool session, polling an MPSC stack every ~10ms.

use crate::concurrent::LockFreeStack;
use crate::ratelimit::RateLimitedLog;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const WRITE_BUF_CAP: usize = 1 << 20;

struct SampleRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct SamplerStatus {
    pub configured: bool,
    pub running: bool,
    pub bytes_written: u64,
    pub bytes_collected: u64,
    pub path: Option<PathBuf>,
}

struct Shared {
    queue: LockFreeStack<SampleRecord>,
    running: AtomicBool,
    bytes_written: AtomicU64,
    bytes_collected: AtomicU64,
    path: std::sync::Mutex<Option<PathBuf>>,
    log: RateLimitedLog,
}

pub struct Sampler {
    dir: PathBuf,
    p: f64,
    window: Duration,
    max_bytes: u64,
    shared: Arc<Shared>,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    configured: AtomicBool,
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            dir: PathBuf::new(),
            p: 0.0,
            window: Duration::ZERO,
            max_bytes: 0,
            shared: Arc::new(Shared {
                queue: LockFreeStack::new(),
                running: AtomicBool::new(false),
                bytes_written: AtomicU64::new(0),
                bytes_collected: AtomicU64::new(0),
                path: std::sync::Mutex::new(None),
                log: RateLimitedLog::new(60),
            }),
            worker: std::sync::Mutex::new(None),
            configured: AtomicBool::new(false),
        }
    }

    pub fn init(&mut self, dir: impl Into<PathBuf>, p: f64, window: Duration, max_bytes: u64) {
        self.dir = dir.into();
        self.p = p;
        self.window = window;
        self.max_bytes = max_bytes;
        self.configured.store(true, Ordering::Release);
    }

    /// Returns `Ok(true)` if the spooler was started, `Ok(false)` if it was
    /// already running.
    pub fn start(&self) -> std::io::Result<bool> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(false);
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let secs = now.as_secs();
        let timestamp = format_timestamp(secs);
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("mcz_samples_{timestamp}.bin"));

        let mut open_opts = OpenOptions::new();
        open_opts.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(0o644);
        }
        let file = open_opts.open(&path)?;

        *self.shared.path.lock().unwrap() = Some(path.clone());
        self.shared.bytes_written.store(0, Ordering::Relaxed);

        let shared = self.shared.clone();
        let window = self.window;
        let max_bytes = self.max_bytes;

        let handle = std::thread::spawn(move || {
            consumer_loop(shared, file, max_bytes, window);
        });
        *self.worker.lock().unwrap() = Some(handle);
        Ok(true)
    }

    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Effective sampling probability. Bootstrap (spec §4.8) forces this to
    /// 1.0 via `force_full` when the table has no "default" dict yet.
    pub fn maybe_record(&self, key: &[u8], value: &[u8], force_full: bool) {
        if !self.shared.running.load(Ordering::Relaxed) {
            return;
        }
        let threshold = if force_full { 1.0 } else { self.p };
        if rand::random::<f64>() >= threshold {
            return;
        }
        if self.shared.bytes_collected.load(Ordering::Relaxed) >= self.max_bytes {
            return;
        }

        let rec_len = (key.len() + value.len()) as u64;
        self.shared.queue.push(SampleRecord {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        self.shared.bytes_collected.fetch_add(rec_len, Ordering::Relaxed);
    }

    pub fn status(&self) -> SamplerStatus {
        SamplerStatus {
            configured: self.configured.load(Ordering::Relaxed),
            running: self.shared.running.load(Ordering::Relaxed),
            bytes_written: self.shared.bytes_written.load(Ordering::Relaxed),
            bytes_collected: self.shared.bytes_collected.load(Ordering::Relaxed),
            path: self.shared.path.lock().unwrap().clone(),
        }
    }
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

fn format_timestamp(epoch_secs: u64) -> String {
    let dt: DateTime<Utc> = DateTime::from_timestamp(epoch_secs as i64, 0).unwrap_or_default();
    dt.format("%Y%m%d_%H%M%S").to_string()
}

fn consumer_loop(shared: Arc<Shared>, file: File, max_bytes: u64, window: Duration) {
    let mut writer = BufWriter::with_capacity(WRITE_BUF_CAP, file);
    let start = Instant::now();

    loop {
        let mut batch = shared.queue.pop_all();
        // LIFO pop_all returns newest-first; reverse to restore arrival order.
        batch.reverse();

        for record in batch {
            if let Err(e) = write_record(&mut writer, &record) {
                shared.log.error(&format!("sampler spool write failed: {e}"));
                shared.running.store(false, Ordering::Release);
                let _ = writer.flush();
                return;
            }
            let len = 8 + record.key.len() as u64 + record.value.len() as u64;
            shared.bytes_written.fetch_add(len, Ordering::Relaxed);

            if shared.bytes_written.load(Ordering::Relaxed) >= max_bytes {
                let _ = writer.flush();
                shared.running.store(false, Ordering::Release);
                return;
            }
        }

        if window > Duration::ZERO && start.elapsed() >= window {
            let _ = writer.flush();
            shared.running.store(false, Ordering::Release);
            return;
        }

        if !shared.running.load(Ordering::Acquire) {
            // Final drain before exit, then flush.
            let mut leftover = shared.queue.pop_all();
            leftover.reverse();
            for record in leftover {
                let _ = write_record(&mut writer, &record);
                let len = 8 + record.key.len() as u64 + record.value.len() as u64;
                shared.bytes_written.fetch_add(len, Ordering::Relaxed);
            }
            let _ = writer.flush();
            return;
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

fn write_record(writer: &mut impl Write, record: &SampleRecord) -> std::io::Result<()> {
    writer.write_all(&(record.key.len() as u32).to_le_bytes())?;
    writer.write_all(&(record.value.len() as u32).to_le_bytes())?;
    writer.write_all(&record.key)?;
    writer.write_all(&record.value)?;
    Ok(())
}
