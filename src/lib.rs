//! Integration checks for SMB/CIFS servers: cross-session consistency,
//! mounted-share I/O and stress, multi-connection load and permission
//! edge cases.

pub mod backend;
pub mod config;
pub mod consistency;
pub mod data;
pub mod error;
pub mod load;
pub mod mount;
pub mod observability;
pub mod perms;
pub mod runner;
pub mod stress;
