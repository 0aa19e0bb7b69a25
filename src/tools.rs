use crate::engine::{EngineKind, MediaEngine, YtDlpEngine};
use crate::paths::AppPaths;
use crate::worker::IN_PLACE_MARKER;
use crate::{cmd, AppError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

#[cfg(windows)]
const FFMPEG_DOWNLOAD_URL: &str =
    "https://github.com/yt-dlp/FFmpeg-Builds/releases/latest/download/ffmpeg-master-latest-win64-gpl.zip";
#[cfg(target_os = "linux")]
const FFMPEG_DOWNLOAD_URL: &str =
    "https://github.com/yt-dlp/FFmpeg-Builds/releases/latest/download/ffmpeg-master-latest-linux64-gpl.zip";

const ENGINE_RELEASE_BASE: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";
const ENGINE_CHECKSUM_FILE: &str = "SHA2-256SUMS";
const MIN_ENGINE_SIZE_BYTES: u64 = 512 * 1024;

#[derive(Debug, Clone, Serialize)]
pub struct FfmpegStatus {
    pub installed: bool,
    pub local: bool,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub ffmpeg_version: Option<String>,
    pub ffprobe_version: Option<String>,
}

/// Probes the local `bin/` directory first and the search path second, the
/// same order the engine configuration will use them.
pub fn ffmpeg_status(paths: &AppPaths) -> FfmpegStatus {
    let local = paths.ffmpeg_bin_path().exists() && paths.ffprobe_bin_path().exists();
    let ffmpeg_cmd = paths.ffmpeg_cmd();
    let ffprobe_cmd = paths.ffprobe_cmd();
    let ffmpeg_version = cmd::version_first_line(&ffmpeg_cmd, "-version");
    let ffprobe_version = cmd::version_first_line(&ffprobe_cmd, "-version");
    let installed = local || (ffmpeg_version.is_some() && ffprobe_version.is_some());

    FfmpegStatus {
        installed,
        local,
        ffmpeg_path: ffmpeg_cmd.to_string_lossy().to_string(),
        ffprobe_path: ffprobe_cmd.to_string_lossy().to_string(),
        ffmpeg_version,
        ffprobe_version,
    }
}

/// Directory to hand the engine as its ffmpeg location, when the local
/// install is present.
pub fn local_ffmpeg_dir(paths: &AppPaths) -> Option<std::path::PathBuf> {
    if paths.ffmpeg_bin_path().exists() && paths.ffprobe_bin_path().exists() {
        Some(paths.bin_dir())
    } else {
        None
    }
}

/// Downloads the prebuilt FFmpeg archive and installs exactly the two
/// executables the app needs. The archive is deleted whether or not any
/// step fails.
pub fn install_ffmpeg_tools(
    paths: &AppPaths,
    log: &mut dyn FnMut(String),
) -> Result<FfmpegStatus> {
    paths.ensure_dirs()?;

    let url = ffmpeg_download_url()?;
    let archive = paths.cache_dir().join("ffmpeg.zip");

    log(format!("Downloading from {url}..."));
    if let Err(err) = download_with_progress(url, &archive, "Downloading FFmpeg", log) {
        if archive.exists() {
            let _ = std::fs::remove_file(&archive);
        }
        return Err(err);
    }
    log("FFmpeg download complete. Extracting...".to_string());

    let status = install_ffmpeg_from_archive(paths, &archive)?;
    log("FFmpeg successfully extracted to 'bin' folder.".to_string());
    Ok(status)
}

fn ffmpeg_download_url() -> Result<&'static str> {
    #[cfg(any(windows, target_os = "linux"))]
    return Ok(FFMPEG_DOWNLOAD_URL);

    #[cfg(not(any(windows, target_os = "linux")))]
    Err(AppError::InstallFailed(
        "automatic FFmpeg install is not supported on this platform".to_string(),
    ))
}

/// Extraction half of the bootstrap: pulls the two executables out of the
/// archive and then deletes it, success or not.
fn install_ffmpeg_from_archive(paths: &AppPaths, archive: &Path) -> Result<FfmpegStatus> {
    let result = (|| -> Result<()> {
        let extracted = extract_ffmpeg_binaries(archive, &paths.bin_dir())?;
        if extracted != 2 {
            return Err(AppError::InstallFailed(format!(
                "archive did not contain both ffmpeg and ffprobe (found {extracted})"
            )));
        }
        mark_executable(&paths.ffmpeg_bin_path())?;
        mark_executable(&paths.ffprobe_bin_path())?;
        Ok(())
    })();

    if archive.exists() {
        let _ = std::fs::remove_file(archive);
    }
    result?;
    Ok(ffmpeg_status(paths))
}

fn download_with_progress(
    url: &str,
    dest: &Path,
    label: &str,
    log: &mut dyn FnMut(String),
) -> Result<()> {
    let resp = ureq::get(url)
        .call()
        .map_err(|e| AppError::InstallFailed(format!("{label} failed: {e}")))?;
    let status = resp.status();
    if status.as_u16() >= 400 {
        return Err(AppError::InstallFailed(format!(
            "{label} failed (status={status})"
        )));
    }

    let total = resp
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0);

    let mut reader = resp.into_body().into_reader();
    let mut file = std::fs::File::create(dest)?;
    let mut buf = [0u8; 64 * 1024];
    let mut downloaded: u64 = 0;
    let mut last_percent: i64 = -1;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        if let Some(total) = total {
            let percent = (downloaded * 100 / total) as i64;
            if percent != last_percent {
                last_percent = percent;
                log(format!("{IN_PLACE_MARKER}{label}... {percent}%"));
            }
        }
    }
    file.flush()?;
    Ok(())
}

/// Pulls `ffmpeg` and `ffprobe` (with or without `.exe`) out of the
/// archive's `bin/` directory, flattened into `out_dir`. Everything else in
/// the archive is ignored, so hostile entry paths never touch the
/// filesystem.
fn extract_ffmpeg_binaries(zip_path: &Path, out_dir: &Path) -> Result<usize> {
    let file = std::fs::File::open(zip_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        AppError::InstallFailed(format!(
            "failed to read zip archive {}: {e}",
            zip_path.to_string_lossy()
        ))
    })?;

    std::fs::create_dir_all(out_dir)?;
    let mut found: Vec<String> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| AppError::InstallFailed(format!("zip read failed: {e}")))?;
        if entry.is_dir() {
            continue;
        }

        let name = entry.name().replace('\\', "/");
        let base = name.rsplit('/').next().unwrap_or("").to_string();
        let stem = base.strip_suffix(".exe").unwrap_or(&base);
        if stem != "ffmpeg" && stem != "ffprobe" {
            continue;
        }
        let in_bin = name
            .rsplit_once('/')
            .map(|(dir, _)| dir.ends_with("bin"))
            .unwrap_or(true);
        if !in_bin || found.contains(&base) {
            continue;
        }

        let mut out_file = std::fs::File::create(out_dir.join(&base))?;
        std::io::copy(&mut entry, &mut out_file)?;
        found.push(base);
    }

    Ok(found.len())
}

#[cfg(unix)]
fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if path.exists() {
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub available: bool,
    pub managed_installed: bool,
    pub managed_path: String,
    pub resolved_path: String,
    pub version: Option<String>,
    pub kind: Option<EngineKind>,
}

pub fn engine_status(paths: &AppPaths) -> EngineStatus {
    let managed = paths.engine_bin_path();
    match YtDlpEngine::locate(paths) {
        Ok(engine) => EngineStatus {
            available: true,
            managed_installed: managed.exists(),
            managed_path: managed.to_string_lossy().to_string(),
            resolved_path: engine.program().to_string_lossy().to_string(),
            version: engine.version(),
            kind: Some(engine.kind()),
        },
        Err(_) => EngineStatus {
            available: false,
            managed_installed: managed.exists(),
            managed_path: managed.to_string_lossy().to_string(),
            resolved_path: String::new(),
            version: None,
            kind: None,
        },
    }
}

/// Installs (or replaces) the managed engine binary: latest release asset,
/// staged to a temporary file, checked against the published SHA-256
/// manifest and a minimum plausible size, then swapped into place.
pub fn install_engine(paths: &AppPaths) -> Result<EngineStatus> {
    paths.ensure_dirs()?;

    let asset = engine_asset_name()?;
    let url = format!("{ENGINE_RELEASE_BASE}/{asset}");
    let destination = paths.engine_bin_path();
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = destination.with_extension("download");

    let staged = (|| -> Result<()> {
        let resp = ureq::get(url.as_str())
            .call()
            .map_err(|e| AppError::InstallFailed(format!("engine download failed: {e}")))?;
        let status = resp.status();
        if status.as_u16() >= 400 {
            return Err(AppError::InstallFailed(format!(
                "engine download failed (status={status})"
            )));
        }
        {
            let mut reader = resp.into_body().into_reader();
            let mut file = std::fs::File::create(&tmp_path)?;
            std::io::copy(&mut reader, &mut file)?;
            file.flush()?;
        }

        let downloaded_size = std::fs::metadata(&tmp_path).map(|m| m.len()).unwrap_or(0);
        if downloaded_size < MIN_ENGINE_SIZE_BYTES {
            return Err(AppError::InstallFailed(
                "downloaded engine binary is unexpectedly small".to_string(),
            ));
        }

        let checksums = fetch_release_checksums()?;
        let expected = checksums.get(asset).ok_or_else(|| {
            AppError::InstallFailed(format!("checksum manifest has no entry for {asset}"))
        })?;
        let actual = sha256_file(&tmp_path)?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AppError::HashMismatch {
                path: tmp_path.clone(),
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    })();

    if let Err(err) = staged {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(err);
    }

    if destination.exists() {
        let _ = std::fs::remove_file(&destination);
    }
    if std::fs::rename(&tmp_path, &destination).is_err() {
        std::fs::copy(&tmp_path, &destination)?;
        let _ = std::fs::remove_file(&tmp_path);
    }
    mark_executable(&destination)?;

    Ok(engine_status(paths))
}

fn engine_asset_name() -> Result<&'static str> {
    if cfg!(windows) {
        Ok("yt-dlp.exe")
    } else if cfg!(target_os = "macos") {
        Ok("yt-dlp_macos")
    } else if cfg!(target_os = "linux") {
        Ok("yt-dlp_linux")
    } else {
        Err(AppError::InstallFailed(
            "automatic engine install is not supported on this platform".to_string(),
        ))
    }
}

fn fetch_release_checksums() -> Result<HashMap<String, String>> {
    let url = format!("{ENGINE_RELEASE_BASE}/{ENGINE_CHECKSUM_FILE}");
    let resp = ureq::get(url.as_str())
        .call()
        .map_err(|e| AppError::InstallFailed(format!("checksum manifest fetch failed: {e}")))?;
    let text = resp
        .into_body()
        .read_to_string()
        .map_err(|e| AppError::InstallFailed(format!("checksum manifest unreadable: {e}")))?;
    Ok(parse_checksum_manifest(&text))
}

/// `SHA2-256SUMS` format: one `<hex digest>  <file name>` pair per line.
fn parse_checksum_manifest(text: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(digest), Some(name)) = (parts.next(), parts.next()) else {
            continue;
        };
        if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
            continue;
        }
        out.insert(
            name.trim_start_matches('*').to_string(),
            digest.to_ascii_lowercase(),
        );
    }
    out
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).expect("create zip");
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        for (name, data) in entries {
            writer.start_file(*name, options).expect("start entry");
            writer.write_all(data).expect("write entry");
        }
        writer.finish().expect("finish zip");
    }

    #[test]
    fn extraction_takes_only_the_two_executables_flattened() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("ffmpeg.zip");
        write_test_zip(
            &archive,
            &[
                ("ffmpeg-master-latest-linux64-gpl/bin/ffmpeg", b"FFMPEG"),
                ("ffmpeg-master-latest-linux64-gpl/bin/ffprobe", b"FFPROBE"),
                ("ffmpeg-master-latest-linux64-gpl/bin/ffplay", b"FFPLAY"),
                ("ffmpeg-master-latest-linux64-gpl/doc/ffmpeg.txt", b"DOC"),
            ],
        );

        let out_dir = dir.path().join("bin");
        let extracted = extract_ffmpeg_binaries(&archive, &out_dir).expect("extract");
        assert_eq!(extracted, 2);
        assert_eq!(
            std::fs::read(out_dir.join("ffmpeg")).expect("ffmpeg"),
            b"FFMPEG"
        );
        assert_eq!(
            std::fs::read(out_dir.join("ffprobe")).expect("ffprobe"),
            b"FFPROBE"
        );
        assert!(!out_dir.join("ffplay").exists());
        assert!(!out_dir.join("ffmpeg.txt").exists());
    }

    #[test]
    fn extraction_accepts_windows_layouts_and_ignores_strays() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("ffmpeg.zip");
        write_test_zip(
            &archive,
            &[
                ("ffmpeg-build/bin/ffmpeg.exe", b"WINFFMPEG"),
                ("ffmpeg-build/bin/ffprobe.exe", b"WINFFPROBE"),
                ("ffmpeg-build/presets/ffmpeg", b"STRAY"),
                ("../ffmpeg", b"TRAVERSAL"),
            ],
        );

        let out_dir = dir.path().join("bin");
        let extracted = extract_ffmpeg_binaries(&archive, &out_dir).expect("extract");
        assert_eq!(extracted, 2);
        assert!(out_dir.join("ffmpeg.exe").exists());
        assert!(out_dir.join("ffprobe.exe").exists());
        assert!(!dir.path().join("ffmpeg").exists(), "flattening defeats traversal");
    }

    #[test]
    fn extraction_reports_incomplete_archives() {
        let dir = tempfile::tempdir().expect("tempdir");
        let archive = dir.path().join("ffmpeg.zip");
        write_test_zip(&archive, &[("build/bin/ffmpeg", b"FFMPEG")]);

        let extracted = extract_ffmpeg_binaries(&archive, &dir.path().join("bin")).expect("extract");
        assert_eq!(extracted, 1);
    }

    #[test]
    fn archive_install_extracts_the_tools_and_removes_the_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("ensure dirs");
        let archive = paths.cache_dir().join("ffmpeg.zip");
        write_test_zip(
            &archive,
            &[
                ("build/bin/ffmpeg", b"FFMPEG"),
                ("build/bin/ffprobe", b"FFPROBE"),
            ],
        );

        let status = install_ffmpeg_from_archive(&paths, &archive).expect("install");
        assert!(status.local);
        assert!(paths.ffmpeg_bin_path().exists());
        assert!(paths.ffprobe_bin_path().exists());
        assert!(!archive.exists(), "archive is removed after a success");
    }

    #[test]
    fn archive_install_cleans_up_after_an_incomplete_archive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        paths.ensure_dirs().expect("ensure dirs");
        let archive = paths.cache_dir().join("ffmpeg.zip");
        write_test_zip(&archive, &[("build/bin/ffmpeg", b"FFMPEG")]);

        let err = install_ffmpeg_from_archive(&paths, &archive).expect_err("must fail");
        assert!(matches!(err, AppError::InstallFailed(_)));
        assert!(!archive.exists(), "archive is removed after a failure too");
    }

    #[test]
    fn ffmpeg_status_reports_no_local_install_on_a_fresh_layout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());
        let status = ffmpeg_status(&paths);
        assert!(!status.local);
        assert!(local_ffmpeg_dir(&paths).is_none());

        paths.ensure_dirs().expect("ensure dirs");
        std::fs::write(paths.ffmpeg_bin_path(), b"x").expect("ffmpeg");
        std::fs::write(paths.ffprobe_bin_path(), b"x").expect("ffprobe");
        let status = ffmpeg_status(&paths);
        assert!(status.local);
        assert!(status.installed);
        assert_eq!(local_ffmpeg_dir(&paths), Some(paths.bin_dir()));
    }

    #[test]
    fn checksum_manifest_parses_digest_name_pairs() {
        let manifest = "\
0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9  yt-dlp.exe
ABCDEF0123456789abcdef0123456789abcdef0123456789abcdef0123456789  *yt-dlp_linux
not-a-digest  yt-dlp_macos
deadbeef  too-short
";
        let parsed = parse_checksum_manifest(manifest);
        assert_eq!(parsed.len(), 2);
        assert_eq!(
            parsed.get("yt-dlp.exe").map(String::as_str),
            Some("0a1b2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8f9")
        );
        assert_eq!(
            parsed.get("yt-dlp_linux").map(String::as_str),
            Some("abcdef0123456789abcdef0123456789abcdef0123456789abcdef0123456789")
        );
    }

    #[test]
    fn sha256_of_a_known_payload_matches() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("payload");
        std::fs::write(&path, b"hello world").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn engine_asset_name_is_platform_specific() {
        let asset = engine_asset_name().expect("supported test platform");
        assert!(["yt-dlp.exe", "yt-dlp_linux", "yt-dlp_macos"].contains(&asset));
    }
}
