pub mod constants;
pub mod duration_secs;
pub mod error;
pub mod record;
pub mod sink;
pub mod types;

pub use error::{Error, Result};
pub use record::{MrzRecord, RelayRecord};
pub use sink::RecordSink;
pub use types::*;

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
