pub mod consts;
pub mod errors;
pub mod utils;
pub mod config;
pub mod sphere;
pub mod table;
pub mod wcs;
pub mod footprint;
pub mod rtree;
pub mod predicate;
pub mod manifest;
pub mod catalog;
pub mod store;
pub mod index;
pub mod query;
pub mod engine;
pub mod protocol;
pub mod session;

pub use config::SearchConfig;
pub use engine::{BuildReport, Engine};
pub use errors::{Result, SkyqError};
pub use predicate::SearchRegion;
pub use protocol::{Command, StatusLine};
pub use session::Session;
pub use sphere::Vec3;
