// Transport module: non-blocking datagram and stream transports for a poll-driven caller
pub mod traits;
pub mod sockopt;
pub mod link;
pub mod udp;
pub mod unix;
pub mod tcp;
pub mod serving;

pub use traits::*;
pub use unix as uxd;
pub use link::Link;
pub use tcp::Outgoer;
pub use serving::{Acceptor, Incomer, Server};

/// Default socket buffer size requested from the OS.
pub const BUF_SIZE: usize = 8192;
