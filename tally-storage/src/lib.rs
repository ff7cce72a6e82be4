// tally-storage: Storage drivers for the accumulator engine
//
// `SledStorage` implements the key/column contract over a local sled
// database, one tree per site table. `MemoryStorage` implements the same
// contract in memory with failure injection for tests.

pub mod memory;
pub mod sled;

pub use memory::{AvailMarker, MemoryStorage};
pub use sled::SledStorage;
