//! 코덱 벤치마크: 체크섬, 직렬화, 디프레이밍

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tarq::framer::Deframer;
use tarq::packet::internet_checksum;
use tarq::{Packet, PacketType};

fn sealed(size: usize) -> Packet {
    let mut packet = Packet::new(PacketType::Image, vec![0x5Au8; size])
        .unwrap()
        .with_id(1234);
    packet.seal();
    packet
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    for size in [32usize, 256, 1024, 8192] {
        let data = vec![0xA5u8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| internet_checksum(black_box(data)))
        });
    }
    group.finish();
}

fn bench_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("packet");
    for size in [32usize, 256, 1024] {
        let packet = sealed(size);
        let frame = packet.encode();
        group.throughput(Throughput::Bytes(frame.len() as u64));

        group.bench_with_input(BenchmarkId::new("seal_encode", size), &packet, |b, packet| {
            b.iter(|| {
                let mut packet = packet.clone();
                packet.seal();
                black_box(packet.encode())
            })
        });
        group.bench_with_input(BenchmarkId::new("decode_verify", size), &frame, |b, frame| {
            b.iter(|| {
                let packet = Packet::decode(black_box(frame)).unwrap();
                packet.verify().unwrap();
                packet
            })
        });
    }
    group.finish();
}

fn bench_deframer(c: &mut Criterion) {
    // 256바이트 패킷 64개를 100바이트씩 잘라 넣음
    let stream: Vec<u8> = (0..64).flat_map(|_| sealed(256).encode()).collect();

    let mut group = c.benchmark_group("deframer");
    group.throughput(Throughput::Bytes(stream.len() as u64));
    group.bench_function("chunked_stream", |b| {
        b.iter(|| {
            let mut deframer = Deframer::new(Duration::from_secs(10));
            let mut frames = 0;
            for chunk in stream.chunks(100) {
                deframer.push(chunk);
                while deframer.next_frame().is_some() {
                    frames += 1;
                }
            }
            black_box(frames)
        })
    });
    group.finish();
}

criterion_group!(benches, bench_checksum, bench_encode_decode, bench_deframer);
criterion_main!(benches);
