//! Text encoding for lists of embedding vectors.
//!
//! Each vector is written as big-endian `f32`s, URL-safe base64 encoded, and
//! the per-vector tokens are joined with `:`. The separator never appears in
//! the URL-safe alphabet, so the string can be split without escaping.

use crate::embed::Embedding;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use ndarray::Array1;
use thiserror::Error;

/// Separator between encoded vectors
pub const VECTOR_SEPARATOR: char = ':';

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Encoded face data is empty")]
    Empty,
    #[error("Vector {index} is not valid base64: {source}")]
    Base64 {
        index: usize,
        #[source]
        source: base64::DecodeError,
    },
    #[error("Vector {index} has {len} bytes, not a multiple of 4")]
    Misaligned { index: usize, len: usize },
    #[error("Vector {index} is empty")]
    EmptySegment { index: usize },
}

/// Encode a list of vectors into a single string.
///
/// An empty list encodes to an empty string, which `decode` rejects.
pub fn encode(vectors: &[Embedding]) -> String {
    vectors
        .iter()
        .map(|vector| {
            let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_be_bytes()).collect();
            URL_SAFE.encode(bytes)
        })
        .collect::<Vec<_>>()
        .join(&VECTOR_SEPARATOR.to_string())
}

/// Decode a string produced by [`encode`].
pub fn decode(data: &str) -> Result<Vec<Embedding>, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }

    data.split(VECTOR_SEPARATOR)
        .enumerate()
        .map(|(index, segment)| {
            if segment.is_empty() {
                return Err(DecodeError::EmptySegment { index });
            }

            let bytes = URL_SAFE
                .decode(segment)
                .map_err(|source| DecodeError::Base64 { index, source })?;
            if bytes.len() % 4 != 0 {
                return Err(DecodeError::Misaligned {
                    index,
                    len: bytes.len(),
                });
            }

            let values = bytes
                .chunks_exact(4)
                .map(|chunk| f32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect::<Vec<_>>();
            Ok(Array1::from_vec(values))
        })
        .collect()
}
