pub mod chat;
pub mod complete;
pub mod launch;
