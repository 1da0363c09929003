//! Server availability: the `/health` probe and the policy that decides
//! whether to reuse, start, or give up on the server under test.

mod error;
mod probe;
mod server;

pub use error::{ProbeError, Result};
pub use probe::{AvailabilityProbe, DEFAULT_PROBE_TIMEOUT};
pub use server::{ServerConfig, ServerManager, ServerPolicy, ServerSource, DEFAULT_SERVICE};
