//! Gzip payload compression.

use std::io::Read;
use std::io::Write;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::error::CoordinationError;
use crate::error::Result;
use crate::traits::CompressionProvider;

/// Default compression provider: gzip at the default level for every path.
#[derive(Debug, Default, Clone, Copy)]
pub struct GzipCompressionProvider;

fn compression_error(path: &str, err: std::io::Error) -> CoordinationError {
    CoordinationError::Compression {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

impl CompressionProvider for GzipCompressionProvider {
    fn compress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2 + 16), Compression::default());
        encoder.write_all(data).map_err(|e| compression_error(path, e))?;
        encoder.finish().map_err(|e| compression_error(path, e))
    }

    fn decompress(&self, path: &str, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::with_capacity(data.len() * 2);
        decoder.read_to_end(&mut out).map_err(|e| compression_error(path, e))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gzip_restores_payload() {
        let provider = GzipCompressionProvider;
        let data = b"some data some data some data".to_vec();
        let compressed = provider.compress("/node", &data).unwrap();
        assert_ne!(compressed, data);
        assert_eq!(provider.decompress("/node", &compressed).unwrap(), data);
    }

    #[test]
    fn decompress_rejects_garbage() {
        let err = GzipCompressionProvider.decompress("/node", b"not gzip").unwrap_err();
        assert!(matches!(err, CoordinationError::Compression { path, .. } if path == "/node"));
    }
}
