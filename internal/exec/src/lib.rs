//! Runs the shell command a reactor fires when its rendered output changes,
//! capturing its combined stdout/stderr for logging the way the process this
//! crate watches would be logged.

use std::{os::unix::prelude::ExitStatusExt, process::Stdio};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc,
    task,
};

mod error;
pub use self::error::Error;

/// A command a reactor may run. Mirrors the string-vs-argv distinction the
/// configuration format allows: a bare string is run through a shell, an
/// explicit argument list is executed directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Shell(String),
    Argv(Vec<String>),
}

/// Runs `command` to completion, logging every line of its combined output
/// at `debug` on success or `warn` on failure, and returns an error if the
/// command didn't exit successfully.
pub async fn run(command: &Command) -> Result<(), Error> {
    let mut builder = match command {
        Command::Shell(s) => {
            let mut b = std::process::Command::new("bash");
            b.arg("-c").arg(s);
            b
        }
        Command::Argv(argv) => {
            let mut b = std::process::Command::new(&argv[0]);
            b.args(&argv[1..]);
            b
        }
    };

    let mut child = builder
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(Error::Spawn)?;

    let (tx, mut rx) = mpsc::unbounded_channel();

    let stdout = tokio::process::ChildStdout::from_std(child.stdout.take().unwrap())?;
    task::spawn(pipe_lines(stdout, tx.clone()));

    let stderr = tokio::process::ChildStderr::from_std(child.stderr.take().unwrap())?;
    task::spawn(pipe_lines(stderr, tx));

    let wait = task::spawn_blocking(move || child.wait());
    let status = wait.await??;

    let mut lines = Vec::new();
    while let Some(line) = rx.recv().await {
        lines.push(line);
    }

    let level = if status.success() {
        log::Level::Debug
    } else {
        log::Level::Warn
    };
    for line in &lines {
        log::log!(level, "{}", line);
    }

    match status.code() {
        Some(0) => Ok(()),
        Some(code) => Err(Error::ExitStatus(code)),
        None => Err(Error::ExitSignal(status.signal())),
    }
}

async fn pipe_lines<R: AsyncRead + Unpin>(rdr: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(rdr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if tx.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                log::warn!("error reading command output: {:?}", e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shell_command_succeeds() {
        assert!(run(&Command::Shell("exit 0".into())).await.is_ok());
    }

    #[tokio::test]
    async fn shell_command_reports_nonzero_exit() {
        match run(&Command::Shell("exit 7".into())).await {
            Err(Error::ExitStatus(7)) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn argv_command_runs_directly() {
        assert!(run(&Command::Argv(vec!["true".into()])).await.is_ok());
    }

    #[tokio::test]
    async fn captures_output_without_failing() {
        assert!(run(&Command::Shell("echo hello; echo world >&2".into()))
            .await
            .is_ok());
    }
}
