use std::time::Duration;

/// Knobs of one debug session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Thread group passed to `-break-insert` and `-exec-continue`.
    pub thread_group: String,
    /// Upper bound of the `-var-list-children` window.
    pub max_children: u32,
    /// Consecutive SIGINT quit records tolerated before the session is torn down.
    pub sigint_storm_limit: u32,
    /// How long the dispatch loop waits on the transport before re-checking its stop flag.
    pub poll_interval: Duration,
    /// Bound on `cause_break`. `None` waits for gdb for as long as it takes.
    pub interrupt_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            thread_group: "i1".to_string(),
            max_children: 50,
            sigint_storm_limit: 5,
            poll_interval: Duration::from_millis(50),
            interrupt_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn continue_command(&self) -> String {
        format!("-exec-continue --thread-group {}", self.thread_group)
    }
}
