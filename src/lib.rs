pub mod agent;
pub mod cmd;
pub mod config;
pub mod dag;
pub mod errors;
pub mod fabric;
pub mod nebula;
pub mod phase_loop;
pub mod poll;
pub mod publisher;
pub mod pushback;
pub mod telemetry;
pub mod tracker;
pub mod tycho;
pub mod watcher;
pub mod worker_pool;
