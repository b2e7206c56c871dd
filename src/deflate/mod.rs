pub mod block;
pub mod dump;
pub mod tables;

pub use block::{Block, DynamicBlock, FixedBlock, StoredBlock, Token};
