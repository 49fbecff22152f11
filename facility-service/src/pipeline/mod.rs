//! Per-request plumbing: transaction and command queue lifecycle, caller
//! identification and the extractors handlers use to reach them.

mod extractors;
mod middleware;
mod scope;

pub use extractors::{AuthMethod, Caller, ClientIp, CurrentUser, Modules, Scope, Superuser};
pub use middleware::{metrics_middleware, request_pipeline};
pub use scope::{DurableWrite, RequestScope};
