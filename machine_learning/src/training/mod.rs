mod aggregator;
mod towers;

pub use aggregator::GradientAggregator;
pub use towers::{TowerBuilder, Towers, available_devices};
