pub mod database;
pub mod error;
pub mod likes;
pub mod notifications;
pub mod recognition;
mod row_helpers;
pub mod schema;
pub mod users;
pub mod whispers;

pub use database::Database;
pub use error::StoreError;
