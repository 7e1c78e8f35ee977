pub mod config;
pub mod logging;

pub mod checksum;
pub mod cleanup;
pub mod connection;
pub mod download;
pub mod reactor;
pub mod remote;
pub mod service;
pub mod shutdown;
pub mod verify;
pub mod watch;
