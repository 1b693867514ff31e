use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{InstallError, IoContext};

/// Render a command line for logs and error messages.
pub fn display_command(program: &Path, args: &[OsString]) -> String {
    let name = program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string());
    let mut line = name;
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn forward(captured: &mut Vec<String>, output: &mpsc::UnboundedSender<String>, line: String) {
    output.send(line.clone()).ok();
    captured.push(line);
}

/// Run `program` to completion, forwarding each stdout/stderr line to
/// `output` as soon as it is read.
///
/// A non-zero exit becomes [`InstallError::Process`] carrying every captured
/// line. On cancellation the child is killed and `Cancelled` is returned.
pub async fn run(
    program: &Path,
    args: &[OsString],
    output: &mpsc::UnboundedSender<String>,
    cancel: &CancellationToken,
) -> Result<Vec<String>, InstallError> {
    let command = display_command(program, args);
    debug!(%command, "spawning");

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .io_context(|| format!("spawn `{}`", command))?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(InstallError::io(
            format!("attach to `{}`", command),
            std::io::Error::other("missing output pipe"),
        ));
    };
    let mut out_lines = BufReader::new(stdout).lines();
    let mut err_lines = BufReader::new(stderr).lines();
    let (mut out_open, mut err_open) = (true, true);
    let mut captured = Vec::new();

    while out_open || err_open {
        tokio::select! {
            _ = cancel.cancelled() => {
                child.kill().await.ok();
                return Err(InstallError::Cancelled);
            }
            line = out_lines.next_line(), if out_open => {
                match line.io_context(|| format!("read output of `{}`", command))? {
                    Some(line) => forward(&mut captured, output, line),
                    None => out_open = false,
                }
            }
            line = err_lines.next_line(), if err_open => {
                match line.io_context(|| format!("read output of `{}`", command))? {
                    Some(line) => forward(&mut captured, output, line),
                    None => err_open = false,
                }
            }
        }
    }

    let status = tokio::select! {
        _ = cancel.cancelled() => {
            child.kill().await.ok();
            return Err(InstallError::Cancelled);
        }
        status = child.wait() => status.io_context(|| format!("wait for `{}`", command))?,
    };

    if !status.success() {
        return Err(InstallError::Process {
            command,
            status: status.to_string(),
            output: captured,
        });
    }
    Ok(captured)
}
