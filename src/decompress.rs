//! Decompression adapters (component B): pure wrappers over the LZO and zlib collaborators.

use crate::error::{ParseError, ParseResult};
use std::os::raw::c_ulong;

/// Decompress an LZO1X-compressed buffer to exactly `uncompressed_size` bytes.
///
/// The body of every GBX file (after the header and user-data section) is compressed this way.
pub fn lzo_decompress(compressed: &[u8], uncompressed_size: usize) -> ParseResult<Vec<u8>> {
    let mut out = vec![0u8; uncompressed_size];

    lzo1x::decompress_to_slice(compressed, &mut out)
        .map_err(|err| ParseError::Decompression(format!("lzo1x: {err:?}")))?;

    Ok(out)
}

/// Inflate a zlib-compressed buffer to exactly `uncompressed_size` bytes.
///
/// Ghost sample blocks are zlib-compressed independently of the LZO-compressed body.
pub fn zlib_inflate(compressed: &[u8], uncompressed_size: usize) -> ParseResult<Vec<u8>> {
    let mut out = vec![0u8; uncompressed_size];
    let mut out_len = uncompressed_size as c_ulong;

    // SAFETY: `out` is a valid, writable buffer of `out_len` bytes; `compressed` is a valid,
    // readable buffer of `compressed.len()` bytes. `uncompress` writes at most `out_len` bytes
    // and updates it in place to the number actually written.
    let ret = unsafe {
        libz_sys::uncompress(
            out.as_mut_ptr(),
            &mut out_len,
            compressed.as_ptr(),
            compressed.len() as c_ulong,
        )
    };

    if ret != libz_sys::Z_OK {
        return Err(ParseError::Decompression(format!(
            "zlib uncompress returned {ret}"
        )));
    }

    if out_len as usize != uncompressed_size {
        return Err(ParseError::Decompression(format!(
            "zlib inflated {out_len} bytes, expected {uncompressed_size}"
        )));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_roundtrip() {
        let original = b"the quick brown fox jumps over the lazy dog".repeat(4);

        let mut out_len = (original.len() * 2 + 64) as c_ulong;
        let mut compressed = vec![0u8; out_len as usize];
        let ret = unsafe {
            libz_sys::compress(
                compressed.as_mut_ptr(),
                &mut out_len,
                original.as_ptr(),
                original.len() as c_ulong,
            )
        };
        assert_eq!(ret, libz_sys::Z_OK);
        compressed.truncate(out_len as usize);

        let inflated = zlib_inflate(&compressed, original.len()).unwrap();
        assert_eq!(inflated, original);
    }

    #[test]
    fn zlib_rejects_truncated_input() {
        let err = zlib_inflate(&[0, 1, 2], 100).unwrap_err();
        assert!(matches!(err, ParseError::Decompression(_)));
    }
}
