use std::path::{Path, PathBuf};

pub const BASE_DIR_ENV_VAR: &str = "VPD_BASE_DIR";

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Muxing-tool executables live flat in `bin/` next to the app data.
    pub fn bin_dir(&self) -> PathBuf {
        self.base_dir.join("bin")
    }

    pub fn tools_dir(&self) -> PathBuf {
        self.base_dir.join("tools")
    }

    pub fn engine_dir(&self) -> PathBuf {
        self.tools_dir().join("yt-dlp")
    }

    pub fn engine_bin_path(&self) -> PathBuf {
        let mut path = self.engine_dir().join("yt-dlp");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffmpeg_bin_path(&self) -> PathBuf {
        let mut path = self.bin_dir().join("ffmpeg");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffprobe_bin_path(&self) -> PathBuf {
        let mut path = self.bin_dir().join("ffprobe");
        if cfg!(windows) {
            path.set_extension("exe");
        }
        path
    }

    pub fn ffmpeg_cmd(&self) -> PathBuf {
        let path = self.ffmpeg_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffmpeg")
        }
    }

    pub fn ffprobe_cmd(&self) -> PathBuf {
        let path = self.ffprobe_bin_path();
        if path.exists() {
            path
        } else {
            PathBuf::from("ffprobe")
        }
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    pub fn run_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("runs")
    }

    /// Transient files (downloaded archives, staging copies). Contents may be
    /// deleted at any time.
    pub fn cache_dir(&self) -> PathBuf {
        self.base_dir.join("cache")
    }

    pub fn default_download_dir(&self) -> PathBuf {
        if let Ok(exe_path) = std::env::current_exe() {
            if let Some(parent) = exe_path.parent() {
                return parent.join("downloads");
            }
        }
        self.base_dir.join("downloads")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.bin_dir())?;
        std::fs::create_dir_all(self.engine_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        std::fs::create_dir_all(self.run_logs_dir())?;
        std::fs::create_dir_all(self.cache_dir())?;
        Ok(())
    }

    pub fn normalize_base_dir(base_dir: &Path) -> PathBuf {
        base_dir.to_path_buf()
    }
}

/// Base-dir discovery for a portable app: env override first, then the
/// directory the executable runs from.
pub fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var(BASE_DIR_ENV_VAR) {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }

    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_paths_live_under_expected_subdirs() {
        let paths = AppPaths::new(PathBuf::from("/data/vpd"));
        assert!(paths.ffmpeg_bin_path().starts_with("/data/vpd/bin"));
        assert!(paths.ffprobe_bin_path().starts_with("/data/vpd/bin"));
        assert!(paths
            .engine_bin_path()
            .starts_with("/data/vpd/tools/yt-dlp"));
        assert!(paths.run_logs_dir().starts_with("/data/vpd/logs"));
    }

    #[test]
    fn ffmpeg_cmd_falls_back_to_path_lookup_when_not_installed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        assert_eq!(paths.ffmpeg_cmd(), PathBuf::from("ffmpeg"));

        paths.ensure_dirs().expect("ensure dirs");
        std::fs::write(paths.ffmpeg_bin_path(), b"").expect("touch ffmpeg");
        assert_eq!(paths.ffmpeg_cmd(), paths.ffmpeg_bin_path());
    }

    #[test]
    fn ensure_dirs_creates_the_full_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().join("app"));
        paths.ensure_dirs().expect("ensure dirs");
        assert!(paths.bin_dir().is_dir());
        assert!(paths.engine_dir().is_dir());
        assert!(paths.run_logs_dir().is_dir());
        assert!(paths.cache_dir().is_dir());
    }
}
