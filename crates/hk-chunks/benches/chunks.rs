use bytes::Bytes;
use hk_chunks::{compress, decompress, split_fragments, DEFAULT_FRAGMENT_SIZE};

fn make_data(size: usize) -> Vec<u8> {
    // Profile-like data: long runs of repeated keys with some entropy
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn deflate_compress(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| compress(divan::black_box(&data)).unwrap());
}

#[divan::bench(args = [1024, 65536, 1048576, 10485760])]
fn deflate_decompress(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    let packed = compress(&data).unwrap();
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| decompress(divan::black_box(&packed), size).unwrap());
}

#[divan::bench(args = [1048576, 10485760])]
fn compress_and_split(bencher: divan::Bencher, size: usize) {
    let data = make_data(size);
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .bench(|| {
            let packed = Bytes::from(compress(divan::black_box(&data)).unwrap());
            split_fragments(1, packed, DEFAULT_FRAGMENT_SIZE).unwrap()
        });
}

fn main() {
    divan::main();
}
