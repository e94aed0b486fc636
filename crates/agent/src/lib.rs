pub mod dispatcher;
pub mod render;
pub mod session;

pub use dispatcher::Dispatcher;
pub use render::{Outcome, RenderedResult};
pub use session::Session;
