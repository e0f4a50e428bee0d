pub mod rows;
pub mod schema;
pub mod store;

pub use rows::*;
pub use schema::{GRAVE_CARD, GRAVE_DECK, GRAVE_NOTE};
pub use store::{bump_usn, db_err, Store};
