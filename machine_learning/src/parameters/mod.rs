mod gradient;
mod layout;
mod model;

pub use gradient::GradientSet;
pub use layout::{ParamId, ParamLayout};
pub use model::ModelParameters;
