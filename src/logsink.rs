use crate::paths::AppPaths;
use crate::worker::{WorkerEvent, IN_PLACE_MARKER};
use crate::Result;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RUN_LOG_ROTATE_BYTES: u64 = 5 * 1024 * 1024;
const RUN_LOG_MAX_BACKUPS: usize = 2;
const RUN_LOG_MAX_AGE_DAYS: u64 = 30;
const RUN_LOG_TOTAL_CAP_BYTES: u64 = 100 * 1024 * 1024;

/// The displayed log text. Append-only, with one exception: a message
/// carrying the in-place marker overwrites the current last line, which is
/// how per-tick progress stays on a single line.
#[derive(Debug, Default)]
pub struct LogBuffer {
    lines: Vec<String>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: &str) {
        if let Some(rest) = message.strip_prefix(IN_PLACE_MARKER) {
            let line = rest.trim_end_matches('\n').to_string();
            match self.lines.last_mut() {
                Some(last) => *last = line,
                None => self.lines.push(line),
            }
            return;
        }

        for line in message.trim_end_matches('\n').split('\n') {
            self.lines.push(line.to_string());
        }
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn contents(&self) -> String {
        self.lines.join("\n")
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

/// Structured on-disk log of one download run: one JSON line per worker
/// event, named by the run id.
#[derive(Debug)]
pub struct RunLog {
    run_id: String,
    path: PathBuf,
}

impl RunLog {
    pub fn create(paths: &AppPaths, run_id: &str) -> Result<RunLog> {
        std::fs::create_dir_all(paths.run_logs_dir())?;
        Ok(RunLog {
            run_id: run_id.to_string(),
            path: paths.run_logs_dir().join(format!("{run_id}.jsonl")),
        })
    }

    pub fn append(&self, event: &WorkerEvent) -> Result<()> {
        let mut value = serde_json::to_value(event)?;
        if let Some(object) = value.as_object_mut() {
            object.insert("ts_ms".to_string(), serde_json::json!(now_ms()));
            object.insert("run_id".to_string(), serde_json::json!(self.run_id));
        }

        rotate_if_needed(&self.path, RUN_LOG_ROTATE_BYTES)?;
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?
            .write_all(format!("{value}\n").as_bytes())?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Drops run logs past the age limit, then oldest-first until the directory
/// fits the size cap. Called once at startup, off the interface thread.
pub fn prune_run_logs(paths: &AppPaths) -> Result<()> {
    prune_dir(
        &paths.run_logs_dir(),
        Duration::from_secs(RUN_LOG_MAX_AGE_DAYS * 24 * 60 * 60),
        RUN_LOG_TOTAL_CAP_BYTES,
    )
}

fn prune_dir(dir: &Path, max_age: Duration, total_cap_bytes: u64) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);

    let mut candidates: Vec<(PathBuf, SystemTime, u64)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = match entry {
            Ok(v) => v,
            Err(_) => continue,
        };
        let meta = match entry.metadata() {
            Ok(v) => v,
            Err(_) => continue,
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let path = entry.path();

        if modified < cutoff {
            let _ = std::fs::remove_file(&path);
            continue;
        }
        candidates.push((path, modified, meta.len()));
    }

    candidates.sort_by_key(|(_, modified, _)| *modified);
    let mut total: u64 = candidates.iter().map(|(_, _, size)| *size).sum();
    for (path, _modified, size) in candidates {
        if total <= total_cap_bytes {
            break;
        }
        let _ = std::fs::remove_file(&path);
        total = total.saturating_sub(size);
    }

    Ok(())
}

fn rotate_if_needed(path: &Path, rotate_bytes: u64) -> Result<()> {
    let len = match std::fs::metadata(path) {
        Ok(m) => m.len(),
        Err(_) => return Ok(()),
    };
    if len < rotate_bytes {
        return Ok(());
    }
    rotate_file_backups(path, RUN_LOG_MAX_BACKUPS)?;
    Ok(())
}

fn rotate_file_backups(path: &Path, max_backups: usize) -> std::io::Result<()> {
    if max_backups == 0 {
        let _ = std::fs::remove_file(path);
        return Ok(());
    }

    for i in (1..=max_backups).rev() {
        let dst = path_with_suffix(path, &format!(".{i}"));
        let src = if i == 1 {
            path.to_path_buf()
        } else {
            path_with_suffix(path, &format!(".{}", i - 1))
        };

        if !src.exists() {
            continue;
        }
        if dst.exists() {
            let _ = std::fs::remove_file(&dst);
        }
        std::fs::rename(src, dst)?;
    }
    Ok(())
}

fn path_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let file_name = match path.file_name() {
        Some(n) => n.to_string_lossy().to_string(),
        None => suffix.to_string(),
    };
    path.with_file_name(format!("{file_name}{suffix}"))
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
