//! galleria core - media probing and pipeline-graph extraction.
//!
//! This crate holds everything in a catalog sync that does not touch the
//! database: finding files, working out what changed, reading embedded
//! pipeline graphs and turning them into parameter records.
//!
//! # Features
//!
//! - **Probing**: PNG text chunks, MP4/MOV metadata atoms, byte-scan fallback
//! - **Graph model**: one normalized node/link table for both document shapes
//! - **Extraction**: bounded backward tracing from sampler nodes
//! - **Change detection**: parallel walk and three-way diff against the store
//! - **Injectable registry**: node type tables extendable from configuration
//!
//! # Usage
//!
//! ```no_run
//! use galleria_core::{ingest, registry::NodeRegistry};
//! use std::path::Path;
//!
//! let registry = NodeRegistry::builtin();
//! let file = ingest::process_file(Path::new("/library/ComfyUI_0001.png"), &registry)?;
//! for sink in &file.parameters {
//!     println!("{:?} {:?} cfg={:?}", sink.model, sink.sampler, sink.cfg);
//! }
//! # Ok::<(), galleria_core::error::ProbeError>(())
//! ```

pub mod error;
pub mod extractor;
pub mod graph;
pub mod ingest;
pub mod probe;
pub mod registry;
pub mod scanner;
pub mod types;

pub use error::{GraphError, ProbeError, ScanError};
pub use graph::GraphModel;
pub use ingest::IngestedFile;
pub use registry::NodeRegistry;
pub use types::{CachedEntry, CachedState, ChangeSet, FileRecord, MediaKind, ParameterRecord};

/// Version of galleria-core.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
