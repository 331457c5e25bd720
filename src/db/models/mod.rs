//! Database row types.

pub mod sent_reminder;
pub mod user;

pub use self::sent_reminder::*;
pub use self::user::*;
