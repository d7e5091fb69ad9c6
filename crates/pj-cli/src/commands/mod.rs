//! Command implementations

pub mod connect;
pub mod credentials_server;
pub mod git_credentials;
pub mod ssh_server;
