//! Database bootstrap shared by the services

pub mod init;

pub use init::{create_schema, init_database};
