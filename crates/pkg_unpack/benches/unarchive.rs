use std::hint::black_box;
use std::io::{Cursor, Write};

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

/// Builds an archive with `files` regular files of `size` bytes spread over a few directories.
fn build_archive(files: usize, size: usize) -> Vec<u8> {
    let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let mut builder = tar::Builder::new(Vec::new());
    for i in 0..files {
        let mut header = tar::Header::new_ustar();
        header
            .set_path(format!("lib/dir_{}/file_{i}.so", i % 16))
            .unwrap();
        header.set_size(size as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, data.as_slice()).unwrap();
    }
    builder.into_inner().unwrap()
}

fn compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    // Ownership is left alone, the archive records root as the owner.
    let options = pkg_unpack::UnarchiveOptions {
        restore_ownership: false,
        ..pkg_unpack::UnarchiveOptions::default()
    };

    let mut group = c.benchmark_group("unarchive");
    for (files, size) in [(1000, 1024), (10, 1024 * 1024)] {
        let archive = build_archive(files, size);
        group.throughput(Throughput::Bytes(archive.len() as u64));
        group.bench_function(format!("{files} files of {size} bytes"), |b| {
            b.iter_batched(
                || tempfile::tempdir().unwrap(),
                |temp_dir| {
                    pkg_unpack::unarchive_with_options(
                        Cursor::new(black_box(archive.as_slice())),
                        temp_dir.path(),
                        &options,
                    )
                    .unwrap();
                    temp_dir
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();

    let package = compress(&build_archive(1000, 4096));
    c.bench_function("decompress package", |b| {
        b.iter(|| {
            pkg_inflate::decompress(Cursor::new(black_box(package.as_slice())), std::io::sink())
                .unwrap()
        });
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
