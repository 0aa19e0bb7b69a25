use crate::engine::{EngineMessage, MediaEngine};
use crate::options::DownloadConfig;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// A log line starting with this marker replaces the last displayed line
/// instead of appending, so live progress does not flood the log.
pub const IN_PLACE_MARKER: char = '\r';

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Log { line: String },
    ItemStarted { index: usize, url: String },
    ItemFinished { index: usize, url: String, ok: bool },
    RunFinished { stopped: bool, attempted: usize, failed: usize },
}

#[derive(Debug)]
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map(|j| j.is_finished()).unwrap_or(true)
    }

    pub fn join(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

pub fn start_worker(
    engine: Arc<dyn MediaEngine>,
    batch: Vec<String>,
    config: DownloadConfig,
    events: Sender<WorkerEvent>,
) -> WorkerHandle {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_thread = stop.clone();
    let join = thread::spawn(move || {
        run_queue(engine.as_ref(), &batch, &config, &stop_thread, &events);
    });
    WorkerHandle {
        stop,
        join: Some(join),
    }
}

/// Drains the snapshot one item at a time. The cancellation flag is observed
/// at item boundaries only; an in-flight engine call is never interrupted.
/// A failing item is logged and the run moves on.
pub(crate) fn run_queue(
    engine: &dyn MediaEngine,
    batch: &[String],
    config: &DownloadConfig,
    stop: &AtomicBool,
    events: &Sender<WorkerEvent>,
) {
    let mut attempted = 0usize;
    let mut failed = 0usize;

    for (index, url) in batch.iter().enumerate() {
        if stop.load(Ordering::SeqCst) {
            send_log(events, "Download stopped by user.");
            break;
        }

        send_log(events, &format!("--- Starting download of: {url} ---"));
        let _ = events.send(WorkerEvent::ItemStarted {
            index,
            url: url.clone(),
        });
        attempted += 1;

        let mut sink = |message: EngineMessage| {
            send_log(events, &render_message(&message));
        };
        let ok = match engine.download(url, config, &mut sink) {
            Ok(()) => {
                send_log(events, &format!("--- Download finished: {url} ---"));
                true
            }
            Err(err) => {
                failed += 1;
                send_log(events, &format!("--- ERROR downloading {url}: {err} ---"));
                false
            }
        };
        let _ = events.send(WorkerEvent::ItemFinished {
            index,
            url: url.clone(),
            ok,
        });
    }

    send_log(events, "--- Download queue finished. ---");
    let _ = events.send(WorkerEvent::RunFinished {
        stopped: stop.load(Ordering::SeqCst),
        attempted,
        failed,
    });
}

fn send_log(events: &Sender<WorkerEvent>, line: &str) {
    let _ = events.send(WorkerEvent::Log {
        line: line.to_string(),
    });
}

fn render_message(message: &EngineMessage) -> String {
    match message {
        EngineMessage::Info(text) => text.clone(),
        EngineMessage::Warning(text) => format!("[WARNING] {text}"),
        EngineMessage::Error(text) => format!("[ERROR] {text}"),
        EngineMessage::Progress(progress) => {
            let mut line = format!("{}[download] {:.1}%", IN_PLACE_MARKER, progress.percent);
            if let Some(total) = &progress.total {
                line.push_str(&format!(" of {total}"));
            }
            if let Some(speed) = &progress.speed {
                line.push_str(&format!(" at {speed}"));
            }
            if let Some(eta) = &progress.eta {
                line.push_str(&format!(" ETA {eta}"));
            }
            line
        }
    }
}
