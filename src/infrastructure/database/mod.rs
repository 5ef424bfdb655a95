pub mod connection;
pub mod db_cells;
pub mod db_schema;
pub mod db_timings;
pub mod timestamps;

pub use connection::Database;
pub use db_cells::CellMethods;
pub use db_schema::initialize_schema;
pub use db_timings::TimingMethods;
