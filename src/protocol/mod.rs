pub mod wire;

pub use wire::{Frame, FrameCodec, FrameKind};
