pub mod app;
pub mod commands;
pub mod env;
pub mod replay;
pub mod scenario;
