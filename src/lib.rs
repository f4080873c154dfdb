// Library exports for the `vimo` binary and integration tests

pub mod api;
pub mod batch;
pub mod chat;
pub mod collector;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod settings;
pub mod shutdown;
pub mod storage;
pub mod validation;
