pub mod approve;
pub mod init;
pub mod next;
pub mod outbox;
pub mod proposal;
pub mod token;
