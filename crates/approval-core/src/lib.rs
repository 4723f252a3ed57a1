pub mod config;
pub mod delegation;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod io;
pub mod paths;
pub mod proposal;
pub mod reconcile;
pub mod service;
pub mod shape;
pub mod step;
pub mod store;
pub mod token;
pub mod tree;
pub mod types;

pub use error::{ApprovalError, Result};
