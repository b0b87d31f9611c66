//! Platform shell adapter: resolves the command interpreter and owns the
//! recursive process-tree kill primitive. All OS differences for process
//! control live here so the supervisor stays portable.

use std::path::PathBuf;

use crate::exec_stream::ExecError;

/// Environment override for the interpreter path on hosts without a default
/// POSIX shell (Windows).
pub const SHELL_PATH_ENV: &str = "BASH_SHELL_PATH";

/// How to invoke the shell: the composed command string is always passed as a
/// single final argument after `arg_prefix`, never as a parsed argv.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub interpreter: PathBuf,
    pub arg_prefix: Vec<String>,
}

#[cfg(unix)]
pub fn shell_config() -> Result<ShellConfig, ExecError> {
    Ok(ShellConfig {
        interpreter: PathBuf::from("sh"),
        arg_prefix: vec!["-c".to_string()],
    })
}

#[cfg(windows)]
pub fn shell_config() -> Result<ShellConfig, ExecError> {
    let mut searched = Vec::new();

    if let Ok(configured) = std::env::var(SHELL_PATH_ENV) {
        let path = PathBuf::from(configured);
        if path.is_file() {
            return Ok(ShellConfig {
                interpreter: path,
                arg_prefix: vec!["-c".to_string()],
            });
        }
        searched.push(path);
    }

    const CANDIDATES: &[&str] = &[
        r"C:\Program Files\Git\bin\bash.exe",
        r"C:\Program Files\Git\usr\bin\bash.exe",
        r"C:\Program Files (x86)\Git\bin\bash.exe",
        r"C:\Program Files (x86)\Git\usr\bin\bash.exe",
    ];
    for candidate in CANDIDATES {
        let path = PathBuf::from(candidate);
        if path.is_file() {
            return Ok(ShellConfig {
                interpreter: path,
                arg_prefix: vec!["-c".to_string()],
            });
        }
        searched.push(path);
    }

    Err(ExecError::ShellNotFound { searched })
}

/// Kills `pid` and every descendant in one step. Never fails: a pid that is
/// already dead, or a group that is already gone, is a no-op.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) {
    let pid = pid as i32;
    // Children are spawned as process-group leaders, so the negative pid
    // reaches the whole tree. Fall back to the plain pid if the group kill
    // is refused (e.g. the leader already exited and the group dissolved).
    let rc = unsafe { libc::kill(-pid, libc::SIGKILL) };
    if rc != 0 {
        let _ = unsafe { libc::kill(pid, libc::SIGKILL) };
    }
}

#[cfg(windows)]
pub fn kill_process_tree(pid: u32) {
    use std::process::Command;
    use std::process::Stdio;

    let spawned = Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();
    if let Err(err) = spawned {
        tracing::debug!(error = ?err, pid, "failed to spawn taskkill");
    }
}

/// Symbolic name for a raw signal number. Only the signals a shell child
/// plausibly dies from are spelled out; the rest render numerically.
pub(crate) fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        3 => "SIGQUIT".to_string(),
        6 => "SIGABRT".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        13 => "SIGPIPE".to_string(),
        14 => "SIGALRM".to_string(),
        15 => "SIGTERM".to_string(),
        other => format!("SIG{other}"),
    }
}
