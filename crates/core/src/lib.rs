pub mod aggregate;
pub mod alert;
pub mod audit;
pub mod config;
pub mod day;
pub mod document;
pub mod error;
pub mod segment;

pub use aggregate::*;
pub use alert::*;
pub use audit::*;
pub use config::Config;
pub use document::*;
pub use error::*;
pub use segment::*;
