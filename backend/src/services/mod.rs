pub mod change_diff;
pub mod directory;
pub mod event_handler;
pub mod identity_cache;
pub mod slack_directory;
pub mod tracked_write;
