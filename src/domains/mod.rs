pub mod agents;
pub mod cells;
pub mod lifecycle;
pub mod services;
pub mod terminal;
pub mod timing;
pub mod workspace;
