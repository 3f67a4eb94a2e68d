//! Clients for the external services FiberWatch talks to.
//!
//! # Services
//!
//! - [`upstream`]: the alert API (open alerts, alert details, client records),
//!   behind a bearer-token session that refreshes itself
//! - [`vendor`]: the messaging gateway that delivers template notifications

pub mod upstream;
pub mod vendor;

pub use upstream::{AuthenticatedClient, Credentials, UpstreamApi};
pub use vendor::{VendorClient, VendorConfig};
