mod handle;
mod shard;
mod store;

pub use handle::ParameterHandle;
use shard::ParameterShard;
pub use store::ParameterStore;
