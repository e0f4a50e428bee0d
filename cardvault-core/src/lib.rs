pub mod config;
pub mod errors;
pub mod filenames;
pub mod intervals;
pub mod markup;
pub mod models;

pub use config::*;
pub use errors::*;
pub use filenames::{bump_ordinal, has_illegal, split_ext, strip_illegal};
pub use intervals::*;
pub use markup::MediaRefs;
pub use models::*;
