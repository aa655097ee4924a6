//! Shared types for citeweave: the reference table consumed by the renderer,
//! error types, configuration and tracing setup.

pub mod config;
pub mod error;
pub mod reference;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use config::{Config, FileStore, Loader, Saver};
pub use error::{CiteweaveError, ParseError};
pub use reference::{Chunk, DocumentAggregate, ReferenceTable};
