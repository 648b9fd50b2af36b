use courier_multipart::MultipartFormData;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn bench_encode_in_memory(c: &mut Criterion) {
    let payload = vec![0x5au8; 64 * 1024];

    c.bench_function("encode_in_memory_16_parts", |b| {
        b.iter(|| {
            let mut form = MultipartFormData::new();
            for i in 0..16 {
                form.append_data_file(payload.clone(), &format!("part{i}"), "chunk.bin", "application/octet-stream");
            }
            black_box(form.encode().unwrap())
        })
    });
}

fn bench_encoded_length(c: &mut Criterion) {
    let mut form = MultipartFormData::new();
    for i in 0..256 {
        form.append_data(vec![b'x'; i], &format!("field{i}"));
    }

    c.bench_function("encoded_length_256_parts", |b| b.iter(|| black_box(form.encoded_length())));
}

criterion_group!(benches, bench_encode_in_memory, bench_encoded_length);
criterion_main!(benches);
