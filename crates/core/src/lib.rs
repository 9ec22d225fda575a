//! Core types for the timeseries cardinality limiter.

pub mod backend;
pub mod error;
pub mod hash;
pub mod limits;
pub mod quota;
pub mod record;

pub use backend::QuotaBackend;
pub use error::{Error, Result};
pub use hash::*;
pub use quota::*;
pub use record::*;
