use std::path::PathBuf;

use vpd_engine::paths::{self, AppPaths};
use vpd_engine::tools;

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut install_all = false;
    let mut install_ffmpeg = false;
    let mut install_engine = false;
    let mut status_only = false;
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "--install-all" => install_all = true,
            "--install-ffmpeg" => install_ffmpeg = true,
            "--install-engine" => install_engine = true,
            "--status" => status_only = true,
            "--force" => force = true,
            other => return Err(format!("unknown arg: {other} (try --help)")),
        }
        i += 1;
    }

    if install_all {
        install_ffmpeg = true;
        install_engine = true;
    }

    if !status_only && !install_ffmpeg && !install_engine {
        return Err("nothing to do (pass --status, --install-all or flags)".to_string());
    }

    let base_dir = base_dir
        .or_else(paths::default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;

    let paths = AppPaths::new(AppPaths::normalize_base_dir(&base_dir));
    paths.ensure_dirs().map_err(|e| e.to_string())?;

    println!("Base dir: {}", paths.base_dir.to_string_lossy());

    if status_only {
        print_status(&paths);
        return Ok(());
    }

    if install_engine {
        let status = tools::engine_status(&paths);
        if status.managed_installed && !force {
            println!("Engine: already installed ({})", status.managed_path);
        } else {
            println!("Engine: installing...");
            let next = tools::install_engine(&paths).map_err(|e| e.to_string())?;
            if !next.managed_installed {
                return Err("engine install did not result in a bundled binary".to_string());
            }
            println!(
                "Engine: installed ({}, version {})",
                next.managed_path,
                next.version.as_deref().unwrap_or("unknown")
            );
        }
    }

    if install_ffmpeg {
        let status = tools::ffmpeg_status(&paths);
        if status.local && !force {
            println!("FFmpeg: already installed ({})", status.ffmpeg_path);
        } else {
            println!("FFmpeg: installing...");
            let mut log = |line: String| println!("{}", line.trim_start_matches('\r'));
            let next = tools::install_ffmpeg_tools(&paths, &mut log).map_err(|e| e.to_string())?;
            if !next.local {
                return Err("FFmpeg install did not result in local binaries".to_string());
            }
            println!("FFmpeg: installed ({})", next.ffmpeg_path);
        }
    }

    Ok(())
}

fn print_status(paths: &AppPaths) {
    let engine = tools::engine_status(paths);
    println!(
        "Engine: available={} version={} kind={:?} path={}",
        engine.available,
        engine.version.as_deref().unwrap_or("-"),
        engine.kind,
        if engine.resolved_path.is_empty() {
            "-"
        } else {
            engine.resolved_path.as_str()
        }
    );

    let ffmpeg = tools::ffmpeg_status(paths);
    println!(
        "FFmpeg: installed={} local={} ffmpeg={} ffprobe={}",
        ffmpeg.installed,
        ffmpeg.local,
        ffmpeg.ffmpeg_version.as_deref().unwrap_or("-"),
        ffmpeg.ffprobe_version.as_deref().unwrap_or("-")
    );
}

fn print_help() {
    println!(
        r#"vpd_setup

Pre-installs runtime dependencies (the yt-dlp engine and FFmpeg tools) into
the VPD data directory, so the app starts ready to download.

Usage:
  cargo run --bin vpd_setup -- --install-all
  cargo run --bin vpd_setup -- --install-ffmpeg
  cargo run --bin vpd_setup -- --install-engine
  cargo run --bin vpd_setup -- --status

Options:
  --base-dir <path>   Override base dir (default: $VPD_BASE_DIR, else the executable's directory)
  --install-all       Install the engine binary and the FFmpeg tools
  --install-ffmpeg    Install ffmpeg/ffprobe into <base-dir>/bin
  --install-engine    Install the bundled engine into <base-dir>/tools/yt-dlp
  --status            Print what is currently available and exit
  --force             Reinstall even if present
"#
    );
}
