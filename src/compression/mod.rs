// src/compression/mod.rs
//! Record stream codecs
//!
//! A package compresses its whole record stream with exactly one codec so
//! small similar files share a dictionary. The cost is that decoding is
//! strictly front-to-back; there is no random access into the stream.
//!
//! Codec identifiers are part of the on-disk format:
//!
//! | id | codec |
//! |----|-------|
//! | 0  | store (no compression) |
//! | 1  | deflate |
//! | 2  | bzip2 |

use std::io::{self, Read, Write};

use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::error::{Error, Result};

/// Supported record stream codecs
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Codec {
    /// No compression
    #[strum(to_string = "store", serialize = "none")]
    #[serde(alias = "none")]
    Store,
    /// Raw deflate stream
    #[default]
    Deflate,
    /// Bzip2 stream
    Bzip2,
}

impl Codec {
    /// Every codec, in identifier order
    pub const ALL: [Codec; 3] = [Codec::Store, Codec::Deflate, Codec::Bzip2];

    /// On-disk identifier
    pub fn id(self) -> u8 {
        match self {
            Self::Store => 0,
            Self::Deflate => 1,
            Self::Bzip2 => 2,
        }
    }

    /// Look up a codec by its on-disk identifier
    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(Self::Store),
            1 => Ok(Self::Deflate),
            2 => Ok(Self::Bzip2),
            other => Err(Error::UnsupportedCodec(other)),
        }
    }

    /// Wrap a writer in a compressing encoder
    pub fn encoder<W: Write>(self, writer: W) -> Encoder<W> {
        match self {
            Self::Store => Encoder::Store(writer),
            Self::Deflate => {
                Encoder::Deflate(DeflateEncoder::new(writer, flate2::Compression::best()))
            }
            Self::Bzip2 => Encoder::Bzip2(BzEncoder::new(writer, bzip2::Compression::best())),
        }
    }

    /// Wrap a reader in a decompressing decoder
    pub fn decoder<'a, R: Read + 'a>(self, reader: R) -> Box<dyn Read + 'a> {
        match self {
            Self::Store => Box::new(reader),
            Self::Deflate => Box::new(DeflateDecoder::new(reader)),
            Self::Bzip2 => Box::new(BzDecoder::new(reader)),
        }
    }
}

/// Compressing writer for one of the supported codecs
///
/// Call [`Encoder::finish`] to flush the trailing compressed block; dropping
/// the encoder without finishing may lose data.
pub enum Encoder<W: Write> {
    Store(W),
    Deflate(DeflateEncoder<W>),
    Bzip2(BzEncoder<W>),
}

impl<W: Write> Encoder<W> {
    /// Finish the compressed stream and return the inner writer
    pub fn finish(self) -> io::Result<W> {
        match self {
            Self::Store(mut w) => {
                w.flush()?;
                Ok(w)
            }
            Self::Deflate(e) => e.finish(),
            Self::Bzip2(e) => e.finish(),
        }
    }
}

impl<W: Write> Write for Encoder<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Store(w) => w.write(buf),
            Self::Deflate(e) => e.write(buf),
            Self::Bzip2(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Store(w) => w.flush(),
            Self::Deflate(e) => e.flush(),
            Self::Bzip2(e) => e.flush(),
        }
    }
}

/// Compress a byte slice with the given codec
pub fn compress(data: &[u8], codec: Codec) -> Result<Vec<u8>> {
    let mut encoder = codec.encoder(Vec::new());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Decompress a byte slice with the given codec
pub fn decompress(data: &[u8], codec: Codec) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    codec.decoder(data).read_to_end(&mut output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_ids() {
        for codec in Codec::ALL {
            assert_eq!(Codec::from_id(codec.id()).unwrap(), codec);
        }
        assert!(matches!(Codec::from_id(7), Err(Error::UnsupportedCodec(7))));
    }

    #[test]
    fn test_codec_names() {
        assert_eq!(Codec::Store.to_string(), "store");
        assert_eq!("none".parse::<Codec>().unwrap(), Codec::Store);
        assert_eq!("bzip2".parse::<Codec>().unwrap(), Codec::Bzip2);
        assert!("zstd".parse::<Codec>().is_err());
    }

    #[test]
    fn test_compress_roundtrip() {
        let data = b"hello hello hello hello hello world".repeat(20);
        for codec in Codec::ALL {
            let compressed = compress(&data, codec).unwrap();
            assert_eq!(decompress(&compressed, codec).unwrap(), data);
        }
    }

    #[test]
    fn test_compression_shrinks_repetitive_data() {
        let data = vec![b'a'; 64 * 1024];
        assert_eq!(compress(&data, Codec::Store).unwrap().len(), data.len());
        assert!(compress(&data, Codec::Deflate).unwrap().len() < data.len() / 10);
        assert!(compress(&data, Codec::Bzip2).unwrap().len() < data.len() / 10);
    }

    #[test]
    fn test_empty_input() {
        for codec in Codec::ALL {
            let compressed = compress(&[], codec).unwrap();
            assert!(decompress(&compressed, codec).unwrap().is_empty());
        }
    }
}
