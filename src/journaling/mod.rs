pub mod debounce;
pub mod scheduler;

pub use debounce::DebounceTimer;
pub use scheduler::{CommitResult, CommitTicket, Draft, SaveEvent, SaveScheduler, StagedAttachment};
