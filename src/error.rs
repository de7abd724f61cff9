use crate::record::RecordError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error("gdb binary '{0}' not found. Install gdb or pass --gdb <path>")]
    GdbNotFound(String),
    #[error("failed to launch gdb '{bin}': {source}")]
    Launch {
        bin: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open gdb {0}")]
    Pipe(&'static str),

    #[error("gdb rejected `{command}`: {message}")]
    Command { command: String, message: String },
    #[error("gdb transport closed")]
    TransportClosed,
    #[error("debug session has ended")]
    SessionEnded,
    #[error("timed out waiting for gdb to interrupt the target")]
    InterruptTimeout,
}
