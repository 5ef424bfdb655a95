pub mod entity;
pub mod store;

pub use entity::{Cell, CellStatus};
pub use store::CellStore;
