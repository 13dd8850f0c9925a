//! 🫁 Compression: optional squeezing of a finished batch before it flies.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression as GzLevel, GzBuilder};
use serde::Deserialize;

/// The name written into the gzip header. Somebody might `gunzip -N` one day.
const GZIP_MEMBER_NAME: &str = "azship";

/// 📦 How a batch is stored in the container.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Newline-delimited JSON, as is. `text` is accepted too.
    #[serde(alias = "text")]
    Plain,
    #[default]
    Gzip,
}

impl Compression {
    /// Fills `%{file_extension}`.
    pub fn file_extension(self) -> &'static str {
        match self {
            Compression::Plain => "txt",
            Compression::Gzip => "gz",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Compression::Plain => "text/plain; charset=utf-8",
            Compression::Gzip => "application/gzip",
        }
    }

    /// 🚀 Turns a batch buffer into the bytes that get uploaded.
    pub fn compress(self, buffer: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Plain => Ok(buffer.to_vec()),
            Compression::Gzip => {
                let mtime = u32::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
                let mut encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
                    .filename(GZIP_MEMBER_NAME)
                    .mtime(mtime)
                    .write(Vec::with_capacity(buffer.len() / 4), GzLevel::default());
                encoder
                    .write_all(buffer)
                    .context("💀 gzip choked while swallowing the batch")?;
                encoder
                    .finish()
                    .context("💀 gzip could not write its trailer. The batch is lost in the squeeze.")
            }
        }
    }

    /// Inverse of [`Compression::compress`]. Useful for reading blobs back.
    pub fn decompress(self, bytes: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::Plain => Ok(bytes.to_vec()),
            Compression::Gzip => {
                let mut out = Vec::with_capacity(bytes.len() * 4);
                GzDecoder::new(bytes)
                    .read_to_end(&mut out)
                    .context("💀 these bytes are not the gzip we were promised")?;
                Ok(out)
            }
        }
    }
}
