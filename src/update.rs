use crate::engine::{EngineKind, MediaEngine};
use crate::paths::AppPaths;
use crate::tools::{install_engine, EngineStatus};
use crate::{AppError, Result};
use serde::Serialize;

pub const RELEASE_PAGE_URL: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest";
const LATEST_RELEASE_API_URL: &str = "https://api.github.com/repos/yt-dlp/yt-dlp/releases/latest";

/// What the shell should offer for the detected distribution variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateAction {
    /// Bundled binary: replace it in place, no restart needed.
    AutoReplace,
    /// Externally installed: point the user at the release page.
    OpenReleasePage,
    /// Python module: its own tooling owns the install.
    PackageManager,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub current_version: Option<String>,
    pub latest_version: String,
    pub update_available: bool,
    pub kind: EngineKind,
    pub action: UpdateAction,
    /// Where `OpenReleasePage` should send the user.
    pub release_page_url: &'static str,
}

/// Compares the engine's `--version` output against the latest published
/// release tag. Network or parse failures bubble up as `UpdateFailed`; the
/// caller reports them and carries on.
pub fn check_for_update(engine: &dyn MediaEngine) -> Result<UpdateStatus> {
    let latest_version = fetch_latest_version()?;
    let current_version = engine.version();
    let update_available = match &current_version {
        Some(current) => is_newer_version(&latest_version, current),
        // Version probe failing on a working engine is unusual; offer the
        // update rather than silently claiming freshness.
        None => true,
    };
    let kind = engine.kind();

    Ok(UpdateStatus {
        current_version,
        latest_version,
        update_available,
        kind,
        action: action_for_kind(kind),
        release_page_url: RELEASE_PAGE_URL,
    })
}

pub fn action_for_kind(kind: EngineKind) -> UpdateAction {
    match kind {
        EngineKind::Managed => UpdateAction::AutoReplace,
        EngineKind::System => UpdateAction::OpenReleasePage,
        EngineKind::PythonModule => UpdateAction::PackageManager,
    }
}

/// In-place update for the managed variant only. The engine runs as a
/// subprocess, so swapping the binary on disk is the whole job; the next
/// queue item already uses the new version.
pub fn apply_update(paths: &AppPaths, engine: &dyn MediaEngine) -> Result<EngineStatus> {
    if engine.kind() != EngineKind::Managed {
        return Err(AppError::UpdateFailed(
            "automatic update applies only to the bundled engine binary".to_string(),
        ));
    }
    install_engine(paths)
}

fn fetch_latest_version() -> Result<String> {
    let resp = ureq::get(LATEST_RELEASE_API_URL)
        .header("accept", "application/vnd.github+json")
        .call()
        .map_err(|e| AppError::UpdateFailed(format!("release check failed: {e}")))?;
    let text = resp
        .into_body()
        .read_to_string()
        .map_err(|e| AppError::UpdateFailed(format!("release response unreadable: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(&text)?;

    value
        .get("tag_name")
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::UpdateFailed("release response missing tag_name".to_string()))
}

/// Dotted numeric comparison; release tags are date-shaped
/// (`2025.01.26`, sometimes with an extra dev component).
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    version_key(latest) > version_key(current)
}

fn version_key(version: &str) -> Vec<u64> {
    version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split('.')
        .map(|part| part.trim().parse().unwrap_or(0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_release_tags_compare_greater() {
        assert!(is_newer_version("2025.08.01", "2025.01.26"));
        assert!(is_newer_version("2025.01.26.232815", "2025.01.26"));
        assert!(!is_newer_version("2025.01.26", "2025.01.26"));
        assert!(!is_newer_version("2024.12.31", "2025.01.01"));
    }

    #[test]
    fn version_keys_ignore_padding_and_tag_prefixes() {
        assert!(is_newer_version("2025.02.01", "2025.1.31"));
        assert!(is_newer_version("v2025.02.01", "2025.01.31"));
        assert!(!is_newer_version("2025.01.31", "2025.1.31"));
    }

    #[test]
    fn each_variant_maps_to_its_update_path() {
        assert_eq!(
            action_for_kind(EngineKind::Managed),
            UpdateAction::AutoReplace
        );
        assert_eq!(
            action_for_kind(EngineKind::System),
            UpdateAction::OpenReleasePage
        );
        assert_eq!(
            action_for_kind(EngineKind::PythonModule),
            UpdateAction::PackageManager
        );
    }
}
