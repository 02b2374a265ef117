pub mod clock;
pub mod config;

pub use clock::LamportClock;
pub use config::ReplicationConfig;
