pub mod cache;
pub mod cli;
pub mod config;
pub mod distance;
pub mod error;
pub mod extractor;
pub mod facedb;
pub mod gallery;
pub mod matcher;
mod metrics;
mod server;
pub mod store;
pub mod sync;

pub use config::Opts;
pub use error::{Error, Result};
pub use facedb::{FaceDB, FaceDBBuilder};
pub use server::{AppState, create_app};
