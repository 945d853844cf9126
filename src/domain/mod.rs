mod entity;
pub mod identifier;
pub mod seed;

pub use entity::*;
pub use identifier::NormalizedId;
