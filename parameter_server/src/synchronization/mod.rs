mod barrier;
mod synchronizer;

pub use barrier::BarrierSync;
pub use synchronizer::Synchronizer;
