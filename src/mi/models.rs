/// A result record (`^done`, `^error`, ...) with the stream output gdb
/// printed while the command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MiResponse {
    pub status: MiStatus,
    pub result: String,
    pub oob: Vec<String>,
}

impl MiResponse {
    pub fn is_error(&self) -> bool {
        matches!(self.status, MiStatus::Error(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiStatus {
    Done,
    Running,
    Error(String),
    Other(String),
}

/// One line of gdb output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MiLine {
    /// `[token]^class,...`
    Result { token: Option<u64>, record: String },
    /// `*` exec and `=` notify records.
    Async(String),
    /// `~` console stream.
    Console(String),
    /// `@` target stream.
    Target(String),
    /// `&` log stream.
    Log(String),
    Prompt,
}
