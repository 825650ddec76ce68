pub mod reassembler;

pub use reassembler::{OrderingValidator, ReassembledEvent, Reassembler};
