mod app;
mod connection;
mod queue;
mod retry;

pub use app::*;
pub use connection::*;
pub use queue::*;
pub use retry::*;
