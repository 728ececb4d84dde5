//! Utility functions that may be helpful for implementing
//! and testing MapReduce applications.
//!

use std::io::{self, BufRead};

use anyhow::{bail, Result};
use bytes::{Buf, Bytes};

/// Read an entire [`Bytes`] slice into a [`String`].
///
/// Note that the entire slice will be read into the string.
/// It is the caller's responsibility to ensure the slice is
/// of the correct length. Failure to do so may result in
/// an error being returned, or the string data being incorrect.
///
/// Returns an error if the slice contains invalid UTF-8.
pub fn string_from_bytes(buf: Bytes) -> Result<String> {
    Ok(String::from_utf8(buf.as_ref().into())?)
}

/// Convert a [`String`] to [`Bytes`].
#[inline]
pub fn string_to_bytes(s: String) -> Bytes {
    Bytes::from(s)
}

/// Encode an intermediate count as 8 big-endian bytes.
#[inline]
pub fn count_to_bytes(count: u64) -> Bytes {
    Bytes::copy_from_slice(&count.to_be_bytes())
}

/// Decode an intermediate count written by [`count_to_bytes`].
pub fn count_from_bytes(mut buf: Bytes) -> Result<u64> {
    if buf.len() != 8 {
        bail!("expected an 8 byte count, got {} bytes", buf.len());
    }
    Ok(buf.get_u64())
}

/// Split `reader` into lines without decoding them.
///
/// Each line loses its `\n` and a trailing `\r`. Bytes that are not valid
/// UTF-8 are passed through untouched.
pub fn byte_lines<R: BufRead>(mut reader: R) -> impl Iterator<Item = io::Result<Bytes>> {
    std::iter::from_fn(move || {
        let mut line = Vec::new();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => None,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                Some(Ok(Bytes::from(line)))
            }
            Err(err) => Some(Err(err)),
        }
    })
}

/// A directory under the system temp dir, removed on drop.
#[cfg(test)]
pub(crate) struct ScratchDir(std::path::PathBuf);

#[cfg(test)]
impl ScratchDir {
    pub(crate) fn new(prefix: &str) -> Self {
        let path = std::env::temp_dir().join(format!("mrlite-{prefix}-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        Self(path)
    }

    pub(crate) fn path(&self) -> &std::path::Path {
        &self.0
    }
}

#[cfg(test)]
impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
