use crate::engine::{MediaEngine, YtDlpEngine};
use crate::logsink::{prune_run_logs, LogBuffer, RunLog};
use crate::options::DownloadOptions;
use crate::paths::AppPaths;
use crate::queue::QueueStore;
use crate::tools::{self, EngineStatus, FfmpegStatus};
use crate::update::{self, UpdateStatus};
use crate::worker::{start_worker, WorkerEvent, WorkerHandle};
use crate::{AppError, Result};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

/// Something the shell must react to on its next tick: completion and
/// stop reports for the run, and results of background update/bootstrap
/// work. `Log` never reaches the shell; `tick` folds it into the buffer.
#[derive(Debug)]
pub enum Notice {
    AllCompleted { attempted: usize, failed: usize },
    RunStopped,
    UpdateStatus(UpdateStatus),
    UpdateApplied(EngineStatus),
    UpdateFailed(String),
    BootstrapFinished(FfmpegStatus),
    BootstrapFailed(String),
    Log(String),
}

#[derive(Debug)]
struct ActiveRun {
    handle: WorkerHandle,
    events: Receiver<WorkerEvent>,
    run_log: Option<RunLog>,
}

/// The one object a windowed shell holds: owns the queue, the log buffer,
/// the engine handle and the active-run state, all confined to the
/// interface thread. Background work reports back through channels that
/// `tick` drains once per event-loop iteration; nothing here blocks.
pub struct AppContext {
    paths: AppPaths,
    engine: Arc<dyn MediaEngine>,
    queue: QueueStore,
    log: LogBuffer,
    run: Option<ActiveRun>,
    active_url: Option<String>,
    notices_tx: Sender<Notice>,
    notices_rx: Receiver<Notice>,
    update_in_flight: bool,
    bootstrap_in_flight: bool,
}

impl AppContext {
    /// Startup entry point. Failing to locate the engine is the one fatal
    /// error: the shell shows the dialog and exits, since nothing else
    /// works without it.
    pub fn new(paths: AppPaths) -> Result<AppContext> {
        paths.ensure_dirs()?;
        let engine: Arc<dyn MediaEngine> = Arc::new(YtDlpEngine::locate(&paths)?);
        Ok(Self::with_engine(paths, engine))
    }

    pub fn with_engine(paths: AppPaths, engine: Arc<dyn MediaEngine>) -> AppContext {
        let prune_paths = paths.clone();
        thread::spawn(move || {
            let _ = prune_run_logs(&prune_paths);
        });

        let (notices_tx, notices_rx) = channel();
        AppContext {
            paths,
            engine,
            queue: QueueStore::new(),
            log: LogBuffer::new(),
            run: None,
            active_url: None,
            notices_tx,
            notices_rx,
            update_in_flight: false,
            bootstrap_in_flight: false,
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn is_downloading(&self) -> bool {
        self.run.is_some()
    }

    /// URL the worker is currently on, for highlighting the active row.
    pub fn active_url(&self) -> Option<&str> {
        self.active_url.as_deref()
    }

    pub fn add_url(&mut self, url: &str) -> Result<()> {
        self.ensure_idle()?;
        self.queue.append(url)
    }

    pub fn remove_entries(&mut self, indices: &[usize]) -> Result<()> {
        self.ensure_idle()?;
        self.queue.remove(indices);
        Ok(())
    }

    pub fn clear_queue(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.queue.clear();
        Ok(())
    }

    /// Queue mutation is interface-thread only and disallowed while a run
    /// drains, which keeps the worker's snapshot aligned with the store.
    fn ensure_idle(&self) -> Result<()> {
        if self.run.is_some() {
            return Err(AppError::DownloadActive);
        }
        Ok(())
    }

    /// Snapshots the queue and the current option state and spawns the
    /// worker. The options are read fresh here and nowhere else.
    pub fn start(&mut self, options: &DownloadOptions) -> Result<()> {
        if self.run.is_some() {
            return Err(AppError::DownloadActive);
        }
        if self.queue.is_empty() {
            return Err(AppError::EmptyQueue);
        }

        let mut config = options.collect(tools::local_ffmpeg_dir(&self.paths));
        if config.destination.is_none() {
            config.destination = Some(self.paths.default_download_dir());
        }
        let run_id = Uuid::new_v4().to_string();
        let run_log = RunLog::create(&self.paths, &run_id).ok();
        let (events_tx, events_rx) = channel();
        let handle = start_worker(
            self.engine.clone(),
            self.queue.snapshot(),
            config,
            events_tx,
        );
        self.run = Some(ActiveRun {
            handle,
            events: events_rx,
            run_log,
        });
        Ok(())
    }

    /// Cooperative: the worker finishes the in-flight item first.
    pub fn stop(&mut self) {
        if let Some(run) = &self.run {
            run.handle.request_stop();
            self.log.push(
                "--- Stop request received... The queue will stop after the current item ---",
            );
        }
    }

    /// Called once per interface tick. Drains worker events (filling the
    /// log, advancing the queue at item boundaries) and background-task
    /// notices; returns whatever the shell must surface.
    pub fn tick(&mut self) -> Vec<Notice> {
        let mut out = Vec::new();
        let mut finished = false;

        if let Some(run) = self.run.as_mut() {
            while let Ok(event) = run.events.try_recv() {
                if let Some(run_log) = &run.run_log {
                    let _ = run_log.append(&event);
                }
                match event {
                    WorkerEvent::Log { line } => self.log.push(&line),
                    WorkerEvent::ItemStarted { url, .. } => self.active_url = Some(url),
                    WorkerEvent::ItemFinished { .. } => {
                        self.queue.pop_front();
                        self.active_url = None;
                    }
                    WorkerEvent::RunFinished {
                        stopped,
                        attempted,
                        failed,
                    } => {
                        finished = true;
                        if stopped {
                            out.push(Notice::RunStopped);
                        } else {
                            out.push(Notice::AllCompleted { attempted, failed });
                        }
                    }
                }
            }
        }

        if finished {
            if let Some(mut run) = self.run.take() {
                run.handle.join();
            }
            self.active_url = None;
        }

        while let Ok(notice) = self.notices_rx.try_recv() {
            match &notice {
                Notice::Log(line) => {
                    self.log.push(line);
                    continue;
                }
                Notice::UpdateFailed(message) => {
                    self.update_in_flight = false;
                    self.log.push(&format!("[ERROR] Update failed: {message}"));
                }
                Notice::UpdateStatus(_) | Notice::UpdateApplied(_) => {
                    self.update_in_flight = false;
                }
                Notice::BootstrapFailed(message) => {
                    self.bootstrap_in_flight = false;
                    self.log.push(&format!("[ERROR] FFmpeg setup failed: {message}"));
                }
                Notice::BootstrapFinished(_) => {
                    self.bootstrap_in_flight = false;
                }
                _ => {}
            }
            out.push(notice);
        }

        out
    }

    pub fn ffmpeg_status(&self) -> FfmpegStatus {
        tools::ffmpeg_status(&self.paths)
    }

    pub fn engine_status(&self) -> EngineStatus {
        tools::engine_status(&self.paths)
    }

    pub fn check_for_update_in_background(&mut self) -> Result<()> {
        self.begin_update_task()?;
        let engine = self.engine.clone();
        let tx = self.notices_tx.clone();
        thread::spawn(move || {
            let notice = match update::check_for_update(engine.as_ref()) {
                Ok(status) => Notice::UpdateStatus(status),
                Err(err) => Notice::UpdateFailed(err.to_string()),
            };
            let _ = tx.send(notice);
        });
        Ok(())
    }

    pub fn apply_update_in_background(&mut self) -> Result<()> {
        self.begin_update_task()?;
        let engine = self.engine.clone();
        let paths = self.paths.clone();
        let tx = self.notices_tx.clone();
        thread::spawn(move || {
            let notice = match update::apply_update(&paths, engine.as_ref()) {
                Ok(status) => Notice::UpdateApplied(status),
                Err(err) => Notice::UpdateFailed(err.to_string()),
            };
            let _ = tx.send(notice);
        });
        Ok(())
    }

    fn begin_update_task(&mut self) -> Result<()> {
        if self.update_in_flight {
            return Err(AppError::UpdateFailed(
                "an update task is already in flight".to_string(),
            ));
        }
        self.update_in_flight = true;
        Ok(())
    }

    pub fn install_ffmpeg_in_background(&mut self) -> Result<()> {
        if self.bootstrap_in_flight {
            return Err(AppError::InstallFailed(
                "an FFmpeg install is already in flight".to_string(),
            ));
        }
        self.bootstrap_in_flight = true;

        let paths = self.paths.clone();
        let tx = self.notices_tx.clone();
        thread::spawn(move || {
            let log_tx = tx.clone();
            let mut log = move |line: String| {
                let _ = log_tx.send(Notice::Log(line));
            };
            let notice = match tools::install_ffmpeg_tools(&paths, &mut log) {
                Ok(status) => Notice::BootstrapFinished(status),
                Err(err) => Notice::BootstrapFailed(err.to_string()),
            };
            let _ = tx.send(notice);
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineKind, EngineMessage};
    use crate::options::DownloadConfig;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct FakeEngine {
        fail_on: Vec<String>,
        gate: Option<(Mutex<mpsc::Sender<String>>, Mutex<mpsc::Receiver<()>>)>,
        calls: Mutex<Vec<String>>,
        capture_to: Option<Arc<Mutex<Vec<DownloadConfig>>>>,
    }

    impl FakeEngine {
        fn new() -> Self {
            Self {
                fail_on: Vec::new(),
                gate: None,
                calls: Mutex::new(Vec::new()),
                capture_to: None,
            }
        }

        /// Engine that announces each download and then blocks until the
        /// test releases it, so stop-timing is deterministic.
        fn gated() -> (Self, mpsc::Receiver<String>, mpsc::Sender<()>) {
            let (started_tx, started_rx) = mpsc::channel();
            let (release_tx, release_rx) = mpsc::channel();
            let mut engine = Self::new();
            engine.gate = Some((Mutex::new(started_tx), Mutex::new(release_rx)));
            (engine, started_rx, release_tx)
        }
    }

    impl MediaEngine for FakeEngine {
        fn download(
            &self,
            url: &str,
            config: &DownloadConfig,
            sink: &mut dyn FnMut(EngineMessage),
        ) -> Result<()> {
            self.calls.lock().expect("calls lock").push(url.to_string());
            if let Some(capture) = &self.capture_to {
                capture.lock().expect("capture lock").push(config.clone());
            }
            if let Some((started, release)) = &self.gate {
                let _ = started.lock().expect("started lock").send(url.to_string());
                let _ = release.lock().expect("gate lock").recv();
            }
            sink(EngineMessage::Info(format!("fetching {url}")));
            if self.fail_on.iter().any(|u| u == url) {
                return Err(AppError::ExternalToolFailed {
                    tool: "yt-dlp".to_string(),
                    code: Some(1),
                    stderr: "Video unavailable".to_string(),
                });
            }
            Ok(())
        }

        fn version(&self) -> Option<String> {
            Some("2025.01.01".to_string())
        }

        fn kind(&self) -> EngineKind {
            EngineKind::System
        }
    }

    fn context_with(engine: FakeEngine) -> (tempfile::TempDir, AppContext) {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().join("app"));
        let ctx = AppContext::with_engine(paths, Arc::new(engine));
        (dir, ctx)
    }

    fn drain_until_idle(ctx: &mut AppContext) -> Vec<Notice> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut notices = Vec::new();
        while ctx.is_downloading() {
            assert!(Instant::now() < deadline, "run did not finish in time");
            notices.extend(ctx.tick());
            thread::sleep(Duration::from_millis(10));
        }
        notices.extend(ctx.tick());
        notices
    }

    #[test]
    fn starting_with_an_empty_queue_is_rejected_without_a_worker() {
        let (_dir, mut ctx) = context_with(FakeEngine::new());
        let err = ctx.start(&DownloadOptions::default()).expect_err("must fail");
        assert!(matches!(err, AppError::EmptyQueue));
        assert!(!ctx.is_downloading());
    }

    #[test]
    fn empty_url_is_rejected_and_queue_is_unchanged() {
        let (_dir, mut ctx) = context_with(FakeEngine::new());
        assert!(matches!(ctx.add_url("  "), Err(AppError::EmptyUrl)));
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn queue_mutation_is_rejected_while_a_run_is_active() {
        let (engine, started, release) = FakeEngine::gated();
        let (_dir, mut ctx) = context_with(engine);
        ctx.add_url("https://example.com/a").expect("add");
        ctx.start(&DownloadOptions::default()).expect("start");

        started.recv().expect("item started");
        assert!(matches!(
            ctx.add_url("https://example.com/b"),
            Err(AppError::DownloadActive)
        ));
        assert!(matches!(ctx.clear_queue(), Err(AppError::DownloadActive)));
        assert!(matches!(
            ctx.start(&DownloadOptions::default()),
            Err(AppError::DownloadActive)
        ));

        release.send(()).expect("release");
        drain_until_idle(&mut ctx);
    }

    #[test]
    fn failed_second_item_still_attempts_the_rest_and_empties_the_queue() {
        let mut engine = FakeEngine::new();
        engine.fail_on.push("https://example.com/1".to_string());
        let (_dir, mut ctx) = context_with(engine);
        for i in 0..3 {
            ctx.add_url(&format!("https://example.com/{i}")).expect("add");
        }

        ctx.start(&DownloadOptions::default()).expect("start");
        let notices = drain_until_idle(&mut ctx);

        assert!(ctx.queue().is_empty(), "queue must be empty at run end");
        assert!(notices.iter().any(|n| matches!(
            n,
            Notice::AllCompleted {
                attempted: 3,
                failed: 1
            }
        )));
        assert!(ctx
            .log()
            .lines()
            .iter()
            .any(|line| line.contains("ERROR downloading https://example.com/1")));
    }

    #[test]
    fn stop_during_the_first_item_suppresses_completion_and_skips_the_rest() {
        let (engine, started, release) = FakeEngine::gated();
        let (_dir, mut ctx) = context_with(engine);
        for i in 0..3 {
            ctx.add_url(&format!("https://example.com/{i}")).expect("add");
        }

        ctx.start(&DownloadOptions::default()).expect("start");
        assert_eq!(started.recv().expect("first item"), "https://example.com/0");
        ctx.stop();
        release.send(()).expect("release first item");

        let notices = drain_until_idle(&mut ctx);
        assert!(notices.iter().any(|n| matches!(n, Notice::RunStopped)));
        assert!(
            !notices.iter().any(|n| matches!(n, Notice::AllCompleted { .. })),
            "no completion dialog after a stop"
        );
        // Item 1 finished and was removed; items 2 and 3 were never reached.
        assert_eq!(ctx.queue().len(), 2);
        assert!(ctx
            .log()
            .lines()
            .iter()
            .any(|line| line == "Download stopped by user."));
    }

    #[test]
    fn start_defaults_the_destination_to_the_downloads_dir() {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let mut engine = FakeEngine::new();
        engine.capture_to = Some(captured.clone());
        let (_dir, mut ctx) = context_with(engine);
        ctx.add_url("https://example.com/a").expect("add");

        ctx.start(&DownloadOptions::default()).expect("start");
        drain_until_idle(&mut ctx);

        let configs = captured.lock().expect("captured");
        assert_eq!(configs.len(), 1);
        assert_eq!(
            configs[0].destination.as_deref(),
            Some(ctx.paths().default_download_dir().as_path())
        );
    }

    #[test]
    fn run_events_are_journaled_to_a_run_log() {
        let (_dir, mut ctx) = context_with(FakeEngine::new());
        ctx.add_url("https://example.com/a").expect("add");
        ctx.start(&DownloadOptions::default()).expect("start");
        drain_until_idle(&mut ctx);

        let entries: Vec<_> = std::fs::read_dir(ctx.paths().run_logs_dir())
            .expect("run logs dir")
            .flatten()
            .collect();
        assert_eq!(entries.len(), 1);
        let text = std::fs::read_to_string(entries[0].path()).expect("read run log");
        assert!(text.lines().count() >= 3);
        assert!(text.contains("\"event\":\"run_finished\""));
    }

    #[test]
    fn active_url_tracks_the_item_in_flight() {
        let (engine, started, release) = FakeEngine::gated();
        let (_dir, mut ctx) = context_with(engine);
        ctx.add_url("https://example.com/a").expect("add");
        ctx.start(&DownloadOptions::default()).expect("start");

        started.recv().expect("item started");
        // Give the started event time to arrive, then drain it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while ctx.active_url().is_none() && Instant::now() < deadline {
            ctx.tick();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(ctx.active_url(), Some("https://example.com/a"));

        release.send(()).expect("release");
        drain_until_idle(&mut ctx);
        assert_eq!(ctx.active_url(), None);
    }
}
