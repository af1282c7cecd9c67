pub mod bridge;
pub mod config;
pub mod event;
pub mod parser;
pub mod queue;
pub mod reader;
pub mod serial;
pub mod session;
pub mod writer;

pub use config::BridgeConfig;
pub use session::BridgeSession;
