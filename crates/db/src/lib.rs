pub mod clean;
pub mod client;
pub mod comment;
pub mod errors;
pub mod events;
pub mod explain;
pub mod fingerprint;
pub mod monitor;
pub mod monitors;
pub mod obfuscate;
pub mod observer;
pub mod platform;
pub mod slow_query;

pub use client::{Client, PostgresClient, ServerId};
pub use errors::{ErrorReport, ErrorSink};
pub use events::Event;
pub use observer::Observer;
