pub mod session;
mod status;

pub use session::SessionState;
pub use status::SessionStatus;
