//! CGI program execution.
//!
//! A request below a CGI path is mapped onto the first regular file found
//! while walking down from the CGI prefix; the unwalked remainder becomes
//! `PATH_INFO`. The program runs with a cleared environment and must exit
//! within [`CGI_TIMEOUT`].

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{parse_response, BackendResponse, DispatchError};

/// Upper bound on a CGI program's run time.
pub const CGI_TIMEOUT: Duration = Duration::from_secs(10);

/// A program located under a CGI path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub program: PathBuf,
    /// Remainder of the request path, `""` or starting with `/`.
    pub path_info: String,
}

/// Walk from `prefix` toward `target`, stopping at the first regular file.
pub fn locate_script(prefix: &Path, target: &Path) -> Option<Script> {
    let rest = target.strip_prefix(prefix).ok()?;
    let mut candidate = prefix.to_path_buf();
    let mut components = rest.components();

    loop {
        if candidate.is_file() {
            let path_info: String = components
                .map(|c| format!("/{}", c.as_os_str().to_string_lossy()))
                .collect();
            return Some(Script {
                program: candidate,
                path_info,
            });
        }
        candidate.push(components.next()?);
    }
}

/// Run `program` and parse its standard output as a response.
pub async fn run(program: &Path, vars: &[(String, String)]) -> Result<BackendResponse, DispatchError> {
    let mut command = Command::new(program);
    command
        .env_clear()
        .envs(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = program.parent() {
        command.current_dir(dir);
    }

    let child = command.spawn().map_err(|source| DispatchError::Spawn {
        path: program.to_path_buf(),
        source,
    })?;

    let output = match tokio::time::timeout(CGI_TIMEOUT, child.wait_with_output()).await {
        Ok(output) => output?,
        Err(_) => {
            return Err(DispatchError::Timeout {
                path: program.to_path_buf(),
                secs: CGI_TIMEOUT.as_secs(),
            })
        }
    };

    if !output.stderr.is_empty() {
        tracing::warn!(
            program = %program.display(),
            stderr = %String::from_utf8_lossy(&output.stderr).trim_end(),
            "CGI program wrote to stderr"
        );
    }
    if !output.status.success() {
        return Err(DispatchError::ExitStatus {
            path: program.to_path_buf(),
            status: output.status,
        });
    }

    parse_response(&output.stdout)
}
