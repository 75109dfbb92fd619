pub mod base;
pub mod engine;
pub mod logging;
pub mod session;

pub use base::*;
pub use engine::*;
pub use logging::*;
pub use session::*;
