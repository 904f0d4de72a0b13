// Library exports for the binaries and integration tests

pub mod app_context;
pub mod archive;
pub mod blob_store;
pub mod config;
pub mod db;
pub mod navigation;
pub mod ordering;
pub mod server;
pub mod tags;
