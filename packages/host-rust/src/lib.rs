//! `modbridge` Host: runs exported functions, serves a module over an
//! encoded request/response protocol, and calls it from the other side.

pub mod client;
pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod module;
pub mod worker;

pub use client::{RemoteModule, Transport};
pub use config::InvocationConfig;
pub use error::HostError;
pub use executor::{execute, execute_with, invoke};
pub use logging::LogFormat;
pub use module::LoadedModule;
pub use worker::{ModuleWorker, WorkerHandle};
