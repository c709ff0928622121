//! kubeforge - Kubernetes cluster lifecycle orchestration over SSH

pub mod config;
pub mod error;
pub mod runtime;
pub mod utils;

pub use error::{Error, Result, Stage};
pub use runtime::{Runtime, RuntimeOptions};
