pub mod models;
pub mod parser;
pub mod session;
pub mod translate;

pub use models::{MiResponse, MiStatus};
pub use session::GdbTransport;
