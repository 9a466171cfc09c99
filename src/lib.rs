pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod runtime;
pub mod sensor;
pub mod session;
pub mod state;
pub mod tracker;
