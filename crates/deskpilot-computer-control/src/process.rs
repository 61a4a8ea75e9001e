//! Subprocess helpers with hard timeouts.
//!
//! Every host call that shells out goes through [`run_command`]: the child is
//! spawned with `kill_on_drop`, and on timeout it is killed explicitly before
//! an [`AutomationError::Timeout`] is returned.

use std::future::Future;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::AutomationError;

/// Captured output of a finished command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Run `program args...`, optionally feeding `stdin`, and fail if it does not
/// finish within `limit` or exits non-zero.
pub async fn run_command(
    program: &str,
    args: &[&str],
    stdin: Option<&[u8]>,
    limit: Duration,
) -> Result<CommandOutput, AutomationError> {
    debug!("Running {} {:?} (timeout {:?})", program, args, limit);

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        // Close stdin so the child sees EOF
        drop(pipe);
    }

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let read_all = async {
        use tokio::io::AsyncReadExt;
        let read_out = async {
            let mut buf = Vec::new();
            if let Some(mut s) = stdout {
                s.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        let read_err = async {
            let mut buf = Vec::new();
            if let Some(mut s) = stderr {
                s.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };
        // Drain both pipes together so a chatty stderr cannot block the child
        let (out, err) = tokio::try_join!(read_out, read_err)?;
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, out, err))
    };

    let waited = tokio::time::timeout(limit, read_all).await;
    let (status, out, err) = match waited {
        Ok(result) => result?,
        Err(_) => {
            warn!("{} timed out after {:?}, killing", program, limit);
            let _ = child.start_kill();
            return Err(AutomationError::Timeout {
                operation: program.to_string(),
                after: limit,
            });
        }
    };

    let output = CommandOutput {
        stdout: String::from_utf8_lossy(&out).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&err).trim_end().to_string(),
    };

    if !status.success() {
        return Err(AutomationError::CommandFailed {
            command: program.to_string(),
            status: status.code().unwrap_or(-1),
            stderr: output.stderr,
        });
    }

    Ok(output)
}

/// Bound any host operation by `limit`, mapping expiry to
/// [`AutomationError::Timeout`].
pub async fn with_timeout<T, F>(operation: &str, limit: Duration, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            warn!("{} timed out after {:?}", operation, limit);
            Err(AutomationError::Timeout {
                operation: operation.to_string(),
                after: limit,
            }
            .into())
        }
    }
}
