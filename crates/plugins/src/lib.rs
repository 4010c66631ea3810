pub mod http;
pub mod snmp;
pub mod stats;
pub mod traits;

pub use http::HttpCollectorPlugin;
pub use snmp::SnmpCollectorPlugin;
pub use traits::CollectorPlugin;
