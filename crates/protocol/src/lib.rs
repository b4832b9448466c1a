pub mod config;
pub mod error;
pub mod frame;
pub mod messages;
pub mod session;
pub mod stats;

pub use config::*;
pub use error::*;
pub use frame::*;
pub use messages::*;
pub use session::*;
pub use stats::*;
