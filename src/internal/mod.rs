pub mod background_thread;
pub mod config;
pub mod data_types;
pub mod directory;
pub mod error;
pub mod events;
pub mod session;
