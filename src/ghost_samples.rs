//! Ghost sample block decoding (component F, §4.F).
//!
//! The sample stream is zlib-compressed independently of the LZO-compressed body: every ghost
//! data chunk (`0x0303F005`/`0x0303F006`) carries its own `(uncompressed_size, compressed_size,
//! bytes)` triple, inflated into a private buffer the samples are then read from.

use crate::decompress::zlib_inflate;
use crate::entities::GhostSample;
use crate::error::ParseResult;
use crate::reader::Reader;
use std::io::Cursor;

/// Inflate and decode one ghost's sample stream, returning its fixed sample period and samples.
///
/// Per-sample trailing bytes (`raw_data`) are sized from a `sample_sizes` table that, when the
/// wire provides fewer entries than samples, falls back to `sample_sizes[0]` for every
/// unaccounted-for sample rather than the size of the *previous* sample — a quirk of the
/// reference decoder preserved here verbatim (see `DESIGN.md`).
pub fn read_sample_block<R: std::io::Read>(
    reader: &mut Reader<R>,
) -> ParseResult<(u32, Vec<GhostSample>)> {
    let uncompressed_size = reader.u32()?;
    let compressed_size = reader.u32()?;
    let compressed = reader.bytes(compressed_size as usize)?;
    let data = zlib_inflate(&compressed, uncompressed_size as usize)?;

    let mut gr = Reader::new(Cursor::new(data));
    gr.bytes(12)?;
    let sample_period = gr.u32()?;
    gr.bytes(4)?;

    let sample_data_size = gr.u32()?;
    let sample_data_pos = gr.pos();
    gr.skip(sample_data_size as u64)?;

    let num_samples = gr.u32()?;
    let mut first_sample_offset = 0u32;
    let mut sample_sizes: Vec<u32> = Vec::new();

    if num_samples > 0 {
        first_sample_offset = gr.u32()?;
        if num_samples > 1 {
            let sps = gr.i32()?;
            if sps == -1 {
                for _ in 0..(num_samples - 1) {
                    sample_sizes.push(gr.u32()?);
                }
            } else {
                sample_sizes.push(sps as u32);
            }
        }
    }

    gr.seek_to(sample_data_pos)?;
    gr.skip(first_sample_offset as u64)?;

    let mut samples = Vec::with_capacity(num_samples as usize);
    for i in 0..num_samples {
        let sample_pos = gr.pos();

        let position = gr.vec3_f32()?;
        let angle = gr.u16()?;
        let axis_heading = gr.i16()?;
        let axis_pitch = gr.i16()?;
        let speed = gr.i16()?;
        let vel_heading = gr.i8()?;
        let vel_pitch = gr.i8()?;

        let sample_size = if (i as usize) >= sample_sizes.len() {
            sample_sizes.first().copied().unwrap_or(0)
        } else {
            sample_sizes[i as usize]
        };

        let consumed = gr.pos() - sample_pos;
        let raw_data = gr.bytes(sample_size.saturating_sub(consumed as u32) as usize)?;

        samples.push(GhostSample {
            position,
            angle,
            axis_heading,
            axis_pitch,
            speed,
            vel_heading,
            vel_pitch,
            raw_data,
        });
    }

    Ok((sample_period, samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_ulong;

    fn zlib_compress(data: &[u8]) -> Vec<u8> {
        let mut out_len = (data.len() * 2 + 64) as c_ulong;
        let mut out = vec![0u8; out_len as usize];
        let ret = unsafe {
            libz_sys::compress(
                out.as_mut_ptr(),
                &mut out_len,
                data.as_ptr(),
                data.len() as c_ulong,
            )
        };
        assert_eq!(ret, libz_sys::Z_OK);
        out.truncate(out_len as usize);
        out
    }

    fn one_sample(pos: (f32, f32, f32), speed: i16) -> Vec<u8> {
        let mut b = vec![];
        b.extend_from_slice(&pos.0.to_le_bytes());
        b.extend_from_slice(&pos.1.to_le_bytes());
        b.extend_from_slice(&pos.2.to_le_bytes());
        b.extend_from_slice(&0u16.to_le_bytes()); // angle
        b.extend_from_slice(&0i16.to_le_bytes()); // axis_heading
        b.extend_from_slice(&0i16.to_le_bytes()); // axis_pitch
        b.extend_from_slice(&speed.to_le_bytes());
        b.push(0); // vel_heading
        b.push(0); // vel_pitch
        b
    }

    /// Builds the inflated sample-block payload (§4.F steps 2-5) around `samples`, each sized
    /// `sample_size` bytes (padded with trailing zero bytes past the fixed fields above).
    fn build_inflated(sample_period: u32, samples: &[Vec<u8>], sample_size: u32, sps: i32) -> Vec<u8> {
        let mut sample_data = vec![];
        for s in samples {
            sample_data.extend_from_slice(s);
            sample_data.resize(sample_data.len() + (sample_size as usize - s.len()), 0);
        }

        let mut b = vec![];
        b.extend_from_slice(&[0u8; 12]);
        b.extend_from_slice(&sample_period.to_le_bytes());
        b.extend_from_slice(&[0u8; 4]);
        b.extend_from_slice(&(sample_data.len() as u32).to_le_bytes());
        b.extend_from_slice(&sample_data);
        b.extend_from_slice(&(samples.len() as u32).to_le_bytes());
        if !samples.is_empty() {
            b.extend_from_slice(&0u32.to_le_bytes()); // first_sample_offset
            if samples.len() > 1 {
                b.extend_from_slice(&sps.to_le_bytes());
                if sps == -1 {
                    for _ in 0..(samples.len() - 1) {
                        b.extend_from_slice(&sample_size.to_le_bytes());
                    }
                }
            }
        }
        b
    }

    #[test]
    fn decodes_samples_with_common_size() {
        let fixed = one_sample((1.0, 2.0, 3.0), 2000);
        let sample_size = fixed.len() as u32 + 4; // 4 trailing opaque bytes
        let inflated = build_inflated(100, &[fixed.clone(), one_sample((4.0, 5.0, 6.0), -32768)], sample_size, sample_size as i32);

        let compressed = zlib_compress(&inflated);
        let mut wire = vec![];
        wire.extend_from_slice(&(inflated.len() as u32).to_le_bytes());
        wire.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        wire.extend_from_slice(&compressed);

        let mut r = Reader::new(Cursor::new(wire));
        let (period, samples) = read_sample_block(&mut r).unwrap();

        assert_eq!(period, 100);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].position, crate::types::Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(samples[0].raw_data.len(), 4);
        assert_eq!(samples[1].speed, -32768);
    }

    #[test]
    fn decodes_samples_with_explicit_per_sample_sizes() {
        let a = one_sample((0.0, 0.0, 0.0), 500);
        let b = one_sample((1.0, 1.0, 1.0), 600);
        let size = a.len() as u32 + 2;
        let inflated = build_inflated(50, &[a, b], size, -1);

        let compressed = zlib_compress(&inflated);
        let mut wire = vec![];
        wire.extend_from_slice(&(inflated.len() as u32).to_le_bytes());
        wire.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        wire.extend_from_slice(&compressed);

        let mut r = Reader::new(Cursor::new(wire));
        let (_, samples) = read_sample_block(&mut r).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].raw_data.len(), 2);
        assert_eq!(samples[1].raw_data.len(), 2);
    }

    #[test]
    fn zero_samples_yields_empty_list() {
        let mut inflated = vec![];
        inflated.extend_from_slice(&[0u8; 12]);
        inflated.extend_from_slice(&77u32.to_le_bytes()); // sample_period
        inflated.extend_from_slice(&[0u8; 4]);
        inflated.extend_from_slice(&0u32.to_le_bytes()); // sample_data_size
        inflated.extend_from_slice(&0u32.to_le_bytes()); // num_samples

        let compressed = zlib_compress(&inflated);
        let mut wire = vec![];
        wire.extend_from_slice(&(inflated.len() as u32).to_le_bytes());
        wire.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        wire.extend_from_slice(&compressed);

        let mut r = Reader::new(Cursor::new(wire));
        let (period, samples) = read_sample_block(&mut r).unwrap();
        assert_eq!(period, 77);
        assert!(samples.is_empty());
    }
}
