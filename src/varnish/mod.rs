//! Edge-proxy integration: the ban/PURGE wire client and the companion
//! Varnish configuration generator whose semantics the client relies on.

pub mod client;
pub mod vcl;

pub use client::{PurgeError, PurgeReport, PurgeTarget, VarnishClient};
