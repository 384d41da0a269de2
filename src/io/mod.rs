//! Sources and sinks.
//!
//! - [`MeshReader`]: gridded timesteps from JSON-lines files.
//! - [`TableReader`]: CSV tables, optionally served one step at a time
//!   (feature `io-csv`).
//! - [`TableWriter`]: atomic CSV or JSON-lines output.
//!
//! All of them read and write gzip transparently when the
//! `compression-gzip` feature is on.

pub mod compression;
pub mod mesh_reader;
pub mod table_writer;

#[cfg_attr(docsrs, doc(cfg(feature = "io-csv")))]
#[cfg(feature = "io-csv")]
pub mod table_reader;

pub use mesh_reader::{MeshReader, MeshReaderOptions};
#[cfg(feature = "io-csv")]
pub use table_reader::{TableReader, TableReaderOptions};
pub use table_writer::{TableFormat, TableWriter};
