use recast_common::{Error, Result};

/// Compression of intermediate layer payloads
pub trait LayerCompressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// LZ4 block compression with the uncompressed size prepended
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl LayerCompressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data).map_err(|e| Error::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lz4_shrinks_repetitive_data() {
        let data = vec![7u8; 4096];
        let packed = Lz4Compressor.compress(&data).unwrap();
        assert!(packed.len() < data.len() / 4);
        assert_eq!(Lz4Compressor.decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_lz4_rejects_garbage() {
        let err = Lz4Compressor.decompress(&[16, 0, 0, 0, 0xf0]).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
        assert!(Lz4Compressor.decompress(&[1, 2]).is_err());
    }
}
