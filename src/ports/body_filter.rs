use bytes::Bytes;
use thiserror::Error;

/// Error type for body filter processing
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FilterError {
    /// The filter rejected or could not transform the chunk
    #[error("filter '{filter}' failed: {message}")]
    Failed { filter: String, message: String },
}

/// A body transformation stage (gzip, ESI parsing and so on).
///
/// Only registration and lookup are handled here; the codec itself lives with
/// the fetch machinery that implements this trait.
pub trait BodyFilter: Send + Sync + 'static {
    /// Name used to reference the filter in a chain specification.
    fn name(&self) -> &str;

    /// Transform one chunk of a body stream.
    fn process(&self, chunk: Bytes) -> Result<Bytes, FilterError>;
}
