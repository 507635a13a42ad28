pub mod bitvec;
pub mod temp;

pub use bitvec::BitVector;
pub use temp::{BlockId, InstrId, MoveId, NodeId, SlotId, VReg};
