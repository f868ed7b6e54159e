pub mod ask;
pub mod history;
pub mod threads;
pub mod triage;
pub mod watch;
