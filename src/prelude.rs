pub use crate::error::{Error, HpResult};
pub use crate::App;

pub use tracing::{debug, error, info, warn};

// vim: ts=4
