//! # javadoc-index
//!
//! Indexes the Java source archives of registered APIs so classes and methods
//! can be resolved to their published documentation pages.
//!
//! ## Architecture
//!
//! - **model**: API, class, method and admin event records
//! - **store**: LMDB environment holding every record family
//! - **registry**: Registered APIs with a case-insensitive unique name
//! - **index**: Class records keyed by (api, package, class name)
//! - **events**: Persisted admin events and their forward-only state machine
//! - **workflow**: Executes ADD, DELETE, UPDATE and RELOAD events
//! - **dispatch**: Background polling of queued events
//! - **download**: Materializes source archives locally
//! - **archive**: Streams allow-listed `.java` entries out of an archive
//! - **parser**: Java declaration extraction using tree-sitter
//! - **queue**: Bounded worker pool feeding the parser
//! - **pipeline**: One ingestion run from archive to index, with its verdict
//! - **progress**: Status lines reported back to the requester
//! - **error**: Typed error taxonomy

pub mod archive;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod events;
pub mod index;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod store;
pub mod workflow;
