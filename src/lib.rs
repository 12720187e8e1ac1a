pub mod adapter;
pub mod app;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod response;
pub mod server;
pub mod supervisor;
pub mod template;
pub mod tools;
