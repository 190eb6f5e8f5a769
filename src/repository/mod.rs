//! Persistence layer for normalized products.

mod models;
pub mod pool;
mod product;

pub use models::ProductRecord;
pub use pool::{AsyncSqlitePool, DieselError};
pub use product::ProductRepository;
