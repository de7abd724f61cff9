use std::time::Duration;

use crate::error::Result;

/// Line-oriented link to the debugger.
///
/// Deliveries pulled from the queue may bundle several `\r\n` separated
/// event records. `request` is the synchronous round trip whose answer is a
/// tagged response string (`60;"value"`, a `20` record, `ERROR`, ...).
pub trait Transport: Send + Sync {
    /// Next queued delivery, `Ok(None)` when nothing arrived within `timeout`.
    fn pull_next_response(&self, timeout: Duration) -> Result<Option<String>>;

    /// Fire and forget. Whatever gdb answers comes back through the queue.
    fn submit_command(&self, command: &str) -> Result<()>;

    fn request(&self, command: &str) -> Result<String>;

    /// Asks gdb to exit. Pending pulls return `TransportClosed` afterwards.
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn pull_next_response(&self, timeout: Duration) -> Result<Option<String>> {
        (**self).pull_next_response(timeout)
    }

    fn submit_command(&self, command: &str) -> Result<()> {
        (**self).submit_command(command)
    }

    fn request(&self, command: &str) -> Result<String> {
        (**self).request(command)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}
