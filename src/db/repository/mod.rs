pub mod sent_reminder;
pub mod user;

pub use sent_reminder::SentReminderRepository;
pub use user::UserRepository;
