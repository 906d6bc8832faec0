pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod process;
pub mod scheduler;
pub mod settings;
pub mod supervisor;
pub mod task;
pub mod util;
