//! Transparent compression for table files.
//!
//! Readers detect the codec from the file extension first and fall back to
//! magic bytes, so a gzip file without a `.gz` suffix still reads. Writers
//! pick the codec from the extension only.
//!
//! ```no_run
//! use geoflow::io::compression::{open_reader, create_writer};
//! use std::io::Write;
//! # fn main() -> anyhow::Result<()> {
//! let mut out = create_writer("events.csv.gz")?;
//! out.write_all(b"time_step,cells\n3,12\n")?;
//! out.finish()?;
//!
//! let _input = open_reader("events.csv.gz")?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// A compression algorithm.
pub trait CompressionCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Lowercase extensions with the leading dot (e.g. `.gz`).
    fn extensions(&self) -> &[&str];

    /// Signature at the start of a compressed stream, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap a reader with decompression.
    fn wrap_reader(&self, reader: Box<dyn Read>) -> Box<dyn Read>;

    /// Wrap a writer with compression.
    fn wrap_writer(&self, writer: Box<dyn Write>) -> Box<dyn FinishWrite>;
}

/// A writer whose trailer must be written explicitly.
///
/// Dropping a compressor writes its trailer but swallows any error, so
/// writers that care about a complete file call [`FinishWrite::finish`].
pub trait FinishWrite: Write {
    /// Flush everything, trailer included.
    ///
    /// # Errors
    /// Returns the underlying I/O error.
    fn finish(self: Box<Self>) -> std::io::Result<()>;
}

impl<W: Write> FinishWrite for BufWriter<W> {
    fn finish(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = self.into_inner().map_err(std::io::IntoInnerError::into_error)?;
        inner.flush()
    }
}

#[cfg(feature = "compression-gzip")]
impl<W: Write> FinishWrite for flate2::write::GzEncoder<W> {
    fn finish(self: Box<Self>) -> std::io::Result<()> {
        let mut inner = (*self).finish()?;
        inner.flush()
    }
}

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl CompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader(&self, reader: Box<dyn Read>) -> Box<dyn Read> {
        Box::new(flate2::read::GzDecoder::new(reader))
    }

    fn wrap_writer(&self, writer: Box<dyn Write>) -> Box<dyn FinishWrite> {
        Box::new(flate2::write::GzEncoder::new(writer, flate2::Compression::default()))
    }
}

fn codecs() -> Vec<Box<dyn CompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Box::new(GzipCodec),
    ]
}

/// Codec selected by the extension of `path`, if any.
#[must_use]
pub fn codec_for_path(path: impl AsRef<Path>) -> Option<Box<dyn CompressionCodec>> {
    let name = path.as_ref().to_string_lossy().to_lowercase();
    codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

/// Extension of `path` (lowercase, no dot) once a compression suffix is
/// removed: `events.csv.gz` gives `csv`.
#[must_use]
pub fn content_extension(path: impl AsRef<Path>) -> Option<String> {
    let name = path.as_ref().file_name()?.to_string_lossy().to_lowercase();
    let suffix = codecs()
        .iter()
        .flat_map(|codec| codec.extensions().iter().copied().collect::<Vec<_>>())
        .find(|ext| name.ends_with(ext))
        .map_or(0, str::len);
    let stem = &name[..name.len() - suffix];
    Path::new(stem).extension().map(|ext| ext.to_string_lossy().into_owned())
}

/// Wrap `reader` with decompression if `path_hint` or the stream's first
/// bytes identify a codec.
///
/// # Errors
/// Returns an error if the stream cannot be peeked.
pub fn auto_detect_reader<R: Read + 'static>(reader: R, path_hint: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    if let Some(codec) = codec_for_path(&path_hint) {
        return Ok(codec.wrap_reader(Box::new(reader)));
    }

    let mut buffered = BufReader::new(reader);
    let head = buffered.fill_buf().context("peek stream header")?;
    let by_magic = codecs()
        .into_iter()
        .find(|codec| codec.magic_bytes().is_some_and(|magic| head.starts_with(magic)));
    match by_magic {
        Some(codec) => Ok(codec.wrap_reader(Box::new(buffered))),
        None => Ok(Box::new(buffered)),
    }
}

/// Wrap `writer` with compression chosen from the extension of `path_hint`.
#[must_use]
pub fn auto_detect_writer<W: Write + 'static>(writer: W, path_hint: impl AsRef<Path>) -> Box<dyn FinishWrite> {
    let buffered = BufWriter::new(writer);
    match codec_for_path(&path_hint) {
        Some(codec) => codec.wrap_writer(Box::new(buffered)),
        None => Box::new(buffered),
    }
}

/// Open a file for reading, decompressing as needed.
///
/// # Errors
/// Returns an error if the file cannot be opened.
pub fn open_reader(path: impl AsRef<Path>) -> Result<Box<dyn Read>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    auto_detect_reader(file, path)
}

/// Create a file for writing, compressing as its extension asks.
///
/// # Errors
/// Returns an error if the file cannot be created.
pub fn create_writer(path: impl AsRef<Path>) -> Result<Box<dyn FinishWrite>> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    Ok(auto_detect_writer(file, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_extension_ignores_the_compression_suffix() {
        assert_eq!(content_extension("out/events.csv").as_deref(), Some("csv"));
        assert_eq!(content_extension("events.JSONL").as_deref(), Some("jsonl"));
        assert_eq!(content_extension("events"), None);
        #[cfg(feature = "compression-gzip")]
        assert_eq!(content_extension("events.csv.gz").as_deref(), Some("csv"));
    }
}
