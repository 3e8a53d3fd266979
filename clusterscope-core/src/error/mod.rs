//! Error handling for the discovery engine
//!
//! The engine talks to many remote APIs that may be slow, misconfigured or
//! simply gone. Almost every failure is recovered locally: the affected value
//! degrades to an empty/default and the error is logged. The error type
//! therefore carries enough structure to decide *how* to log and whether a
//! retry is worthwhile, rather than to bubble up to a caller.
//!
//! ## Error Categories
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Clusterscope Error Taxonomy                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Transient          │  Structural         │  Authorization   │
//! │  • Timeout          │  • Unexpected shape │  • 401 / 403     │
//! │  • Connection       │  • JSON decode      │                  │
//! │  • 5xx status       │  • other 4xx        │                  │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Contract (aborts one archive instance)  │  Configuration    │
//! │  • missing node name, unknown endpoint   │  • invalid config │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod constructors;
pub mod conversions;
pub mod types;

#[cfg(test)]
mod tests;

pub use types::{format_errors, ClusterscopeError, ClusterscopeResult, ErrorKind, Result};
