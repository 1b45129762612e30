use thiserror::Error;

/// Possible errors from running a reactor's command.
#[derive(Debug, Error)]
pub enum Error {
    #[error("error spawning command: {0:?}")]
    Spawn(std::io::Error),

    #[error("command exited with status {0}")]
    ExitStatus(i32),

    #[error("command terminated by signal {0:?}")]
    ExitSignal(Option<i32>),

    #[error("cannot read command output: {0:?}")]
    OutputPipeRead(std::io::Error),

    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
