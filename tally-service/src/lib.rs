// tally-service: Transport-agnostic service facade and control loop

pub mod admin;
pub mod control;
pub mod logging;
pub mod service;
pub mod setup;

pub use admin::Admin;
pub use control::run_control_loop;
pub use logging::{init_logging, LogHandle};
pub use service::Service;
pub use setup::{open_cache, open_storages};
