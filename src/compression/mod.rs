// src/compression/mod.rs
//! Decoding of compressed channel payloads
//!
//! Three encodings show up in conda channels: zstd (`run_exports.json.zst`
//! and the `info-*.tar.zst` member of `.conda` files), bzip2 (`.tar.bz2`
//! artifacts) and gzip (mirrors that serve metadata pre-compressed).

use crate::error::{Error, Result};
use std::io::Read;

/// A compressed payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Bzip2,
    Zstd,
}

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZSTD_MAGIC: &[u8] = &[0x28, 0xb5, 0x2f, 0xfd];

impl Encoding {
    /// Encoding of `data` judged by its leading bytes; `None` when plain
    pub fn sniff(data: &[u8]) -> Option<Self> {
        [(GZIP_MAGIC, Self::Gzip), (BZIP2_MAGIC, Self::Bzip2), (ZSTD_MAGIC, Self::Zstd)]
            .into_iter()
            .find(|(magic, _)| data.starts_with(magic))
            .map(|(_, encoding)| encoding)
    }

    /// Encoding implied by a file name suffix
    ///
    /// ```
    /// use feedstock_solvable::compression::Encoding;
    ///
    /// assert_eq!(Encoding::from_file_name("numpy-1.26.4-py312_0.tar.bz2"), Some(Encoding::Bzip2));
    /// assert_eq!(Encoding::from_file_name("run_exports.json.zst"), Some(Encoding::Zstd));
    /// assert_eq!(Encoding::from_file_name("repodata.json"), None);
    /// ```
    pub fn from_file_name(name: &str) -> Option<Self> {
        match name.rsplit_once('.').map(|(_, ext)| ext) {
            Some("gz") => Some(Self::Gzip),
            Some("bz2") => Some(Self::Bzip2),
            Some("zst") => Some(Self::Zstd),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Zstd => "zstd",
        }
    }

    /// Wrap `reader` in a streaming decoder for this encoding
    pub fn reader<'a, R: Read + 'a>(self, reader: R) -> Result<Box<dyn Read + 'a>> {
        Ok(match self {
            Self::Gzip => Box::new(flate2::read::GzDecoder::new(reader)),
            Self::Bzip2 => Box::new(bzip2::read::BzDecoder::new(reader)),
            Self::Zstd => Box::new(
                zstd::Decoder::new(reader)
                    .map_err(|e| Error::ParseError(format!("cannot start zstd decoder: {e}")))?,
            ),
        })
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decode `data` if it is compressed, otherwise hand it back as is
pub fn decode(data: Vec<u8>) -> Result<Vec<u8>> {
    let Some(encoding) = Encoding::sniff(&data) else {
        return Ok(data);
    };
    let mut decoded = Vec::new();
    encoding
        .reader(data.as_slice())?
        .read_to_end(&mut decoded)
        .map_err(|e| Error::ParseError(format!("corrupt {encoding} payload: {e}")))?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sniff() {
        assert_eq!(Encoding::sniff(&[0x1f, 0x8b, 0x08, 0x00]), Some(Encoding::Gzip));
        assert_eq!(Encoding::sniff(b"BZh91AY&SY"), Some(Encoding::Bzip2));
        assert_eq!(Encoding::sniff(&[0x28, 0xb5, 0x2f, 0xfd, 0x00]), Some(Encoding::Zstd));
        assert_eq!(Encoding::sniff(br#"{"packages": {}}"#), None);
        assert_eq!(Encoding::sniff(&[0x1f]), None);
        assert_eq!(Encoding::sniff(&[]), None);
    }

    #[test]
    fn test_from_file_name() {
        assert_eq!(Encoding::from_file_name("repodata.json.gz"), Some(Encoding::Gzip));
        assert_eq!(Encoding::from_file_name("x-1-0.conda"), None);
        assert_eq!(Encoding::from_file_name("noext"), None);
    }

    #[test]
    fn test_decode_gzip() {
        // gzip of "hello"
        let gzip: Vec<u8> = vec![
            0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xcb, 0x48, 0xcd, 0xc9,
            0xc9, 0x07, 0x00, 0x86, 0xa6, 0x10, 0x36, 0x05, 0x00, 0x00, 0x00,
        ];
        assert_eq!(decode(gzip).unwrap(), b"hello");
    }

    #[test]
    fn test_decode_zstd_and_bzip2() {
        let zst = zstd::encode_all(&br#"{"weak": []}"#[..], 3).unwrap();
        assert_eq!(decode(zst).unwrap(), br#"{"weak": []}"#);

        let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
        encoder.write_all(b"run exports").unwrap();
        assert_eq!(decode(encoder.finish().unwrap()).unwrap(), b"run exports");
    }

    #[test]
    fn test_plain_passes_through() {
        assert_eq!(decode(b"plain".to_vec()).unwrap(), b"plain");
    }

    #[test]
    fn test_corrupt_payload() {
        let err = decode(vec![0x28, 0xb5, 0x2f, 0xfd, 0xff, 0xff]).unwrap_err();
        assert!(err.to_string().contains("zstd"));
    }
}
