use crate::cmd;
use crate::options::{is_playlist_candidate_url, DownloadConfig};
use crate::paths::AppPaths;
use crate::{AppError, Result};
use regex::Regex;
use serde::Serialize;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::thread;

/// Distribution variant of the engine, derived from which resolution
/// candidate won. Decides which update path is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Binary installed under the app's own tools directory.
    Managed,
    /// Found on the system search path.
    System,
    /// Runnable only as `python -m yt_dlp`.
    PythonModule,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressUpdate {
    pub percent: f32,
    pub total: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineMessage {
    Info(String),
    Warning(String),
    Error(String),
    Progress(ProgressUpdate),
}

/// Seam to the external download engine, so the worker and the application
/// context can be driven by a fake in tests.
pub trait MediaEngine: Send + Sync {
    fn download(
        &self,
        url: &str,
        config: &DownloadConfig,
        sink: &mut dyn FnMut(EngineMessage),
    ) -> Result<()>;

    fn version(&self) -> Option<String>;

    fn kind(&self) -> EngineKind;
}

#[derive(Debug, Clone)]
pub struct YtDlpEngine {
    program: PathBuf,
    prefix_args: Vec<String>,
    kind: EngineKind,
}

impl YtDlpEngine {
    /// Resolves a usable engine or fails. Candidate order: bundled binary,
    /// `yt-dlp` on PATH, then the python module. Nothing else in the
    /// application works without one, so the caller treats the error as
    /// fatal.
    pub fn locate(paths: &AppPaths) -> Result<YtDlpEngine> {
        let mut candidates: Vec<(PathBuf, Vec<String>, EngineKind)> = Vec::new();
        let bundled = paths.engine_bin_path();
        if bundled.exists() {
            candidates.push((bundled, Vec::new(), EngineKind::Managed));
        }
        candidates.push((PathBuf::from("yt-dlp"), Vec::new(), EngineKind::System));
        candidates.push((
            PathBuf::from("python"),
            vec!["-m".to_string(), "yt_dlp".to_string()],
            EngineKind::PythonModule,
        ));
        candidates.push((
            PathBuf::from("python3"),
            vec!["-m".to_string(), "yt_dlp".to_string()],
            EngineKind::PythonModule,
        ));

        for (program, prefix_args, kind) in candidates {
            if cmd::version_first_line_with_prefix(&program, &prefix_args, "--version").is_some() {
                return Ok(YtDlpEngine {
                    program,
                    prefix_args,
                    kind,
                });
            }
        }

        Err(AppError::EngineMissing)
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "yt-dlp".to_string())
    }
}

impl MediaEngine for YtDlpEngine {
    fn download(
        &self,
        url: &str,
        config: &DownloadConfig,
        sink: &mut dyn FnMut(EngineMessage),
    ) -> Result<()> {
        let mut command = cmd::command(&self.program);
        command.args(&self.prefix_args);
        let mut args = config.to_args();
        if !config.single_video && !is_playlist_candidate_url(url) {
            args.push("--no-playlist".to_string());
        }
        command.args(&args);
        command.arg(url);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn()?;

        let stderr_handle = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let line = match line {
                    Ok(v) => v,
                    Err(_) => break,
                };
                if let Some(message) = classify_stdout_line(&line) {
                    sink(message);
                }
            }
        }

        let status = child.wait()?;
        let stderr_text = stderr_handle
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        let mut last_error: Option<String> = None;
        for line in stderr_text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(rest) = strip_tagged_prefix(trimmed, "ERROR") {
                last_error = Some(rest.to_string());
                sink(EngineMessage::Error(rest.to_string()));
            } else if let Some(rest) = strip_tagged_prefix(trimmed, "WARNING") {
                sink(EngineMessage::Warning(rest.to_string()));
            } else {
                sink(EngineMessage::Info(trimmed.to_string()));
            }
        }

        if !status.success() {
            return Err(AppError::ExternalToolFailed {
                tool: self.tool_name(),
                code: status.code(),
                stderr: last_error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }

        Ok(())
    }

    fn version(&self) -> Option<String> {
        cmd::version_first_line_with_prefix(&self.program, &self.prefix_args, "--version")
    }

    fn kind(&self) -> EngineKind {
        self.kind
    }
}

fn strip_tagged_prefix<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(tag)?;
    if !(rest.is_empty() || rest.starts_with(':') || rest.starts_with(' ')) {
        return None;
    }
    Some(rest.trim_start_matches(':').trim())
}

fn classify_stdout_line(line: &str) -> Option<EngineMessage> {
    let trimmed = line.trim_end();
    if trimmed.trim().is_empty() {
        return None;
    }
    if let Some(progress) = parse_progress_line(trimmed) {
        return Some(EngineMessage::Progress(progress));
    }
    // Engine-internal debug chatter is noise in the displayed log.
    if trimmed.starts_with("[debug]") {
        return None;
    }
    Some(EngineMessage::Info(trimmed.to_string()))
}

fn progress_regex() -> &'static Regex {
    static PROGRESS_RE: OnceLock<Regex> = OnceLock::new();
    PROGRESS_RE.get_or_init(|| {
        Regex::new(
            r"^\[download\]\s+(?P<pct>\d+(?:\.\d+)?)%(?:\s+of\s+~?\s*(?P<total>\S+))?(?:\s+at\s+(?P<speed>\S+))?(?:\s+ETA\s+(?P<eta>\S+))?",
        )
        .expect("progress regex")
    })
}

/// Parses the engine's native one-line-per-tick progress output, e.g.
/// `[download]  42.5% of 10.00MiB at 2.50MiB/s ETA 00:05`.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let caps = progress_regex().captures(line)?;
    let percent: f32 = caps.name("pct")?.as_str().parse().ok()?;
    Some(ProgressUpdate {
        percent,
        total: caps.name("total").map(|m| m.as_str().to_string()),
        speed: caps.name("speed").map(|m| m.as_str().to_string()),
        eta: caps.name("eta").map(|m| m.as_str().to_string()),
    })
}
