//! Benchmarks `Gbx::parse_slice` over synthetic fixtures built in-process, the same way
//! `tests/test.rs` does — no network fetch of real `.Gbx`/block fixtures (see `DESIGN.md`).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gbx::Gbx;

struct Builder {
    bytes: Vec<u8>,
    first_lookback: bool,
}

impl Builder {
    fn new() -> Self {
        Self {
            bytes: vec![],
            first_lookback: true,
        }
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.bytes.push(v);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn raw(&mut self, v: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(v);
        self
    }

    fn string(&mut self, s: &str) -> &mut Self {
        self.u32(s.len() as u32);
        self.raw(s.as_bytes())
    }

    fn lookback_fresh(&mut self, s: &str) -> &mut Self {
        if self.first_lookback {
            self.u32(0);
            self.first_lookback = false;
        }
        self.u32(0);
        self.string(s)
    }

    fn into_vec(self) -> Vec<u8> {
        self.bytes
    }
}

const END_OF_NODE: u32 = 0xFACA_DE01;

fn wrap_gbx_file(class_id: u32, body: &[u8]) -> Vec<u8> {
    let mut file = vec![];
    file.extend_from_slice(b"GBX");
    file.extend_from_slice(&6u16.to_le_bytes());
    file.extend_from_slice(&[0u8; 3]);
    file.push(0);
    file.extend_from_slice(&class_id.to_le_bytes());
    file.extend_from_slice(&4u32.to_le_bytes());
    file.extend_from_slice(&0u32.to_le_bytes());
    file.extend_from_slice(&0u32.to_le_bytes());
    file.extend_from_slice(&0u32.to_le_bytes());

    let mut compressed = vec![0u8; lzo1x::worst_compress(body.len())];
    let compressed = lzo1x::compress_to_slice(body, &mut compressed);

    file.extend_from_slice(&(body.len() as u32).to_le_bytes());
    file.extend_from_slice(&(compressed.len() as u32).to_le_bytes());
    file.extend_from_slice(compressed);
    file
}

/// A challenge body chunk with `num_blocks` distinct blocks, sized to resemble a real track.
fn build_challenge_fixture(num_blocks: u32) -> Vec<u8> {
    let mut node = Builder::new();

    node.u32(0x0304_301F);
    node.lookback_fresh("BenchmarkTrack")
        .lookback_fresh("Stadium")
        .lookback_fresh("Nadeo")
        .string("Benchmark Track")
        .u32(13) // mood: well-known "Lagoon"
        .lookback_fresh("Day")
        .lookback_fresh("Nadeo")
        .i32(48)
        .i32(40)
        .i32(48)
        .i32(0)
        .i32(1) // wide block flags
        .u32(num_blocks);

    for i in 0..num_blocks {
        let name = format!("Block{}", i % 16);
        node.lookback_fresh(&name).u8((i % 4) as u8).raw(&[
            (i % 48) as u8,
            (i % 8) as u8,
            (i % 48) as u8,
        ]);
        node.u32(0);
    }

    node.u32(0x0305_B004);
    node.i32(20000).i32(18000).i32(16000).i32(15000).u32(0);

    node.u32(END_OF_NODE);
    node.into_vec()
}

fn bench(c: &mut Criterion) {
    let small = wrap_gbx_file(0x0304_3000, &build_challenge_fixture(4));
    c.bench_function("parse small challenge (4 blocks)", |b| {
        b.iter(|| black_box(Gbx::parse_slice(&small).unwrap()))
    });

    let large = wrap_gbx_file(0x0304_3000, &build_challenge_fixture(2000));
    c.bench_function("parse large challenge (2000 blocks)", |b| {
        b.iter(|| black_box(Gbx::parse_slice(&large).unwrap()))
    });
}

criterion_group!(benches, bench);
criterion_main!(benches);
