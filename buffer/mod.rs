// Buffer module: transmit queue and receive accumulator owned by each transport
pub mod queue;
pub mod accumulator;

pub use queue::*;
pub use accumulator::*;
