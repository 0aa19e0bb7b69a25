use std::ffi::OsStr;
use std::process::Command;

pub fn command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    configure_for_background(&mut cmd);
    cmd
}

/// Runs `<program> <arg>` and returns the first non-empty stdout line, or
/// None when the tool is missing, exits non-zero, or prints nothing usable.
pub fn version_first_line(program: impl AsRef<OsStr>, arg: &str) -> Option<String> {
    version_first_line_with_prefix(program, &[], arg)
}

pub fn version_first_line_with_prefix(
    program: impl AsRef<OsStr>,
    prefix: &[String],
    arg: &str,
) -> Option<String> {
    let output = command(program).args(prefix).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

#[cfg(windows)]
fn configure_for_background(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;

    // Prevent console windows from stealing focus while running tools.
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(windows))]
fn configure_for_background(_cmd: &mut Command) {}
