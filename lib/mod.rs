// lib: single entry point for applications built on the hio transports
// Re-exports every layer plus the file configuration and logging setup

// Re-export core vocabulary (addresses, verbosity, clocks, errors)
pub use hio_core::*;

// Re-export queues and the wire recorder
pub use hio_buffer::{RxAccumulator, TxQueue};
pub use hio_wirelog::{Direction, WireLog, WireLogConfig};

// Re-export plain and TLS transports
pub use hio_transport::*;
pub use hio_tls::{Certify, IncomerTls, OutgoerTls, ServerTls, TlsConfig, Version};

pub mod config;
pub mod logging;

pub use config::Config;
