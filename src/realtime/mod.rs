pub mod models;
pub use models::*;

mod broadcaster;
pub use broadcaster::*;

mod dispatcher;
pub use dispatcher::*;

mod sse;
mod ws;

pub use sse::{live_updates_sse, poll_updates_sse};
pub use ws::live_updates_ws;
