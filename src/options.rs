use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

const PLAYLIST_OUTPUT_TEMPLATE: &str = "%(playlist)s/%(playlist_index)s - %(title)s.%(ext)s";
const SINGLE_OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    VideoAndAudio,
    AudioMp3,
    AudioM4a,
    VideoOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityCap {
    Best,
    P1080,
    P720,
    P480,
}

impl QualityCap {
    pub fn max_height(self) -> Option<u32> {
        match self {
            QualityCap::Best => None,
            QualityCap::P1080 => Some(1080),
            QualityCap::P720 => Some(720),
            QualityCap::P480 => Some(480),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Container {
    Auto,
    Mp4,
    Mkv,
}

impl Container {
    fn as_merge_format(self) -> Option<&'static str> {
        match self {
            Container::Auto => None,
            Container::Mp4 => Some("mp4"),
            Container::Mkv => Some("mkv"),
        }
    }
}

/// The UI selections as they stand when a run starts. Read fresh per run,
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOptions {
    pub format: FormatKind,
    pub quality: QualityCap,
    pub container: Container,
    pub subtitles: bool,
    pub subtitle_langs: String,
    pub destination: Option<PathBuf>,
    pub single_video: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            format: FormatKind::VideoAndAudio,
            quality: QualityCap::Best,
            container: Container::Auto,
            subtitles: false,
            subtitle_langs: "en,it".to_string(),
            destination: None,
            single_video: false,
        }
    }
}

/// One engine configuration per run, produced by the option collector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadConfig {
    pub format_selector: String,
    pub output_template: String,
    pub destination: Option<PathBuf>,
    pub extract_audio: Option<&'static str>,
    pub merge_container: Option<&'static str>,
    pub subtitles: Option<Vec<String>>,
    pub single_video: bool,
    pub ffmpeg_location: Option<PathBuf>,
}

impl DownloadOptions {
    pub fn collect(&self, ffmpeg_location: Option<PathBuf>) -> DownloadConfig {
        let (format_selector, extract_audio) = match self.format {
            FormatKind::AudioMp3 => ("ba/b".to_string(), Some("mp3")),
            FormatKind::AudioM4a => ("ba/b".to_string(), Some("m4a")),
            FormatKind::VideoOnly => match self.quality.max_height() {
                Some(h) => (format!("bv[height<={h}]"), None),
                None => ("bv".to_string(), None),
            },
            FormatKind::VideoAndAudio => match self.quality.max_height() {
                Some(h) => (format!("bv*[height<={h}]+ba/b[height<={h}]"), None),
                None => ("bv*+ba/b".to_string(), None),
            },
        };

        let output_template = if self.single_video {
            SINGLE_OUTPUT_TEMPLATE.to_string()
        } else {
            PLAYLIST_OUTPUT_TEMPLATE.to_string()
        };

        let subtitles = if self.subtitles {
            Some(
                self.subtitle_langs
                    .split(',')
                    .map(str::trim)
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            None
        };

        DownloadConfig {
            format_selector,
            output_template,
            destination: self.destination.clone(),
            extract_audio,
            merge_container: self.container.as_merge_format(),
            subtitles,
            single_video: self.single_video,
            ffmpeg_location,
        }
    }
}

impl DownloadConfig {
    /// Engine argument vector, without the URL. Per-item failures must not
    /// abort a playlist, hence `--ignore-errors`; `--newline` keeps progress
    /// one line per tick so the adapter can parse it.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--ignore-errors".to_string(),
            "--newline".to_string(),
            "-f".to_string(),
            self.format_selector.clone(),
            "-o".to_string(),
            self.output_template.clone(),
        ];

        if let Some(dir) = &self.destination {
            args.push("-P".to_string());
            args.push(dir.to_string_lossy().to_string());
        }

        if let Some(codec) = self.extract_audio {
            args.push("-x".to_string());
            args.push("--audio-format".to_string());
            args.push(codec.to_string());
        }

        if let Some(container) = self.merge_container {
            args.push("--merge-output-format".to_string());
            args.push(container.to_string());
        }

        if let Some(langs) = &self.subtitles {
            args.push("--write-subs".to_string());
            if !langs.is_empty() {
                args.push("--sub-langs".to_string());
                args.push(langs.join(","));
            }
        }

        if self.single_video {
            args.push("--no-playlist".to_string());
        }

        if let Some(ffmpeg) = &self.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }

        args
    }
}

/// Whether a URL can expand into more than one item. Single youtube videos
/// should stay single-file at the download step even without the user flag.
pub fn is_playlist_candidate_url(url: &str) -> bool {
    let parsed = match Url::parse(url) {
        Ok(v) => v,
        Err(_) => return false,
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    if host == "youtu.be" {
        return false;
    }
    if host.ends_with("youtube.com") {
        let path = parsed.path();
        if path.starts_with("/playlist") {
            return true;
        }
        if parsed.query_pairs().any(|(key, _)| key == "list") {
            return true;
        }
        return !(path.starts_with("/watch")
            || path.starts_with("/shorts/")
            || path.starts_with("/live/"));
    }
    // Unknown hosts: leave playlist expansion to the engine.
    true
}
