//! Bounded execution of external CLIs (`docker`, `kubectl`).

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::trace;

use crate::error::{RuntimeError, RuntimeResult};

/// Run `program args..`, optionally feeding `stdin`, and return trimmed
/// stdout. A non-zero exit is an error carrying stderr; exceeding `limit`
/// kills the child.
pub(crate) async fn run(
    program: &str,
    args: &[String],
    stdin: Option<&[u8]>,
    limit: Duration,
) -> RuntimeResult<String> {
    let rendered = format!("{program} {}", args.join(" "));
    trace!(command = %rendered, "exec");

    let mut command = Command::new(program);
    command
        .args(args)
        .kill_on_drop(true)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let exec = async {
        let mut child = command.spawn()?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }
        child.wait_with_output().await
    };

    let output = timeout(limit, exec)
        .await
        .map_err(|_| RuntimeError::Timeout {
            what: rendered.clone(),
            after: limit,
        })??;

    if !output.status.success() {
        return Err(RuntimeError::Command {
            command: rendered,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// `args!["run", "-d", name]` → `Vec<String>`.
macro_rules! args {
    ($($arg:expr),* $(,)?) => {
        vec![$(::std::string::ToString::to_string(&$arg)),*]
    };
}
pub(crate) use args;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_feeds_stdin() {
        let out = run("cat", &[], Some(b"hello\n"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let err = run("false", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Command { .. }));
    }

    #[tokio::test]
    async fn slow_commands_time_out() {
        let err = run("sleep", &args!["5"], None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_io_error() {
        let err = run("fleet-no-such-binary", &[], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Io(_)));
    }
}
