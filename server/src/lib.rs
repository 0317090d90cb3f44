//! webdeploy library
//!
//! Core modules of the website deployment service.

pub mod app;
pub mod cloud;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod logstream;
pub mod models;
pub mod pipeline;
pub mod provision;
pub mod server;
pub mod services;
pub mod storage;
pub mod store;
pub mod utils;
pub mod workers;
