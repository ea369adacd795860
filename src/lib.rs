pub mod audit;
pub mod config;
pub mod curve;
pub mod engine;
pub mod error;
pub mod intent;
pub mod logging;
pub mod storage;
pub mod verify;
