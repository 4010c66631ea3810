pub mod entities;
pub mod repositories;
pub mod value_objects;

pub use collector_errors::{CollectError, CollectorError, CollectorResult};
pub use entities::*;
pub use repositories::*;
pub use value_objects::*;
