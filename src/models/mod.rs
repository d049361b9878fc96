pub mod user;
pub mod conversation;
pub mod message;

pub use user::*;
pub use conversation::*;
pub use message::*;
