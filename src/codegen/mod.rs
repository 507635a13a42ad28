pub mod color;
pub mod dominator;
pub mod frame_color;
mod graph;
pub mod liveness;
pub mod loops;
pub mod reg_alloc;
pub mod rewrite;
pub mod verify;
