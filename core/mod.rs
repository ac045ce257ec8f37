// Core module: addresses, verbosity, clocks and errors shared by every transport (NO socket I/O)
pub mod types;
pub mod clock;
pub mod error;

pub use types::*;
pub use clock::*;
pub use error::*;
