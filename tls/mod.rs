// TLS module: rustls sessions layered over the non-blocking stream transports
pub mod config;
pub mod session;
pub mod outgoer;
pub mod serving;

pub use config::{Certify, TlsConfig, Version};
pub use session::Session;
pub use outgoer::OutgoerTls;
pub use serving::{IncomerTls, ServerTls};
