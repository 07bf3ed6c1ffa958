pub mod cli;
pub mod client;
pub mod config;
pub mod console;
pub mod dispatcher;
pub mod error;
pub mod keepalive;
pub mod name_pool;
pub mod orchestrator;
pub mod pacing;
pub mod reporter;
pub mod run;
pub mod stats;
pub mod teardown;
pub mod testutil;
