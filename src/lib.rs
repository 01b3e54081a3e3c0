// Crate root: declare modules and control visibility
pub mod channel;
pub mod config;
pub mod delivery;
pub mod emulator;
pub mod handoff;
pub mod memory;
pub mod monitor;
pub mod payload;
pub mod proxy;
pub mod proxy_server;
pub mod registers;
pub mod session;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub mod testkit;

// Re-export commonly used API from the library for binaries/tests
pub use config::SessionConfig;
pub use delivery::{run_delivery, DeliveryConfig, DeliveryReport};
pub use emulator::{AccessOutcome, Emulator, MemoryAccess, RemoteEmulator};
pub use monitor::{Monitor, RwLogMonitor};
pub use payload::{ExploitPayload, PayloadSpec};
pub use registers::RegisterSet;
pub use session::{Session, SessionState};
pub use sync::{SyncDirection, SyncSnapshot};
pub use transport::{DebugTransport, TcpProbeTransport};
