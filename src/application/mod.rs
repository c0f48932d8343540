pub mod chat;
pub mod tooling;
pub mod transport;
