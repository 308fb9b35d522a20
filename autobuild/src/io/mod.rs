//! Side-effecting adapters: persistence, child processes, HTTP and the write path.

pub mod approvals;
pub mod config;
pub mod docs;
pub mod executor;
pub mod inspect;
pub mod lock;
pub mod process;
pub mod state_store;
pub mod validator;
pub mod writer;
