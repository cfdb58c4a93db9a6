// Copyright 2020-2022 The NATS Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::convert::TryFrom;
use std::time::{Duration, Instant};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use nats_poll::{AckInfo, HeaderMap};
use nats_test_server::NatsTestServer;

pub fn decode_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));

    let block = b"NATS/1.0 404 No Messages\r\nNats-Msg-Id: abc\r\nX-Trace: 1\r\n\r\n";
    group.bench_function("header_block", |b| {
        b.iter(|| HeaderMap::try_from(black_box(&block[..])).unwrap())
    });

    let legacy = "$JS.ACK.ORDERS.worker.1.42.40.1610000000000000000.8";
    let modern = "$JS.ACK.hub.ACCHASH.ORDERS.worker.1.42.40.1610000000000000000.8.tok";
    group.bench_function("ack_subject_legacy", |b| {
        b.iter(|| AckInfo::parse(black_box(legacy)).unwrap())
    });
    group.bench_function("ack_subject", |b| {
        b.iter(|| AckInfo::parse(black_box(modern)).unwrap())
    });
    group.finish();
}

pub fn pub_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    group.warm_up_time(Duration::from_secs(1));
    group.throughput(Throughput::Elements(1));

    let server = NatsTestServer::build().spawn();
    let bmsg: Vec<u8> = (0..8192).map(|_| 22).collect();
    for size in [32, 128, 1024, 8192].iter() {
        let mut nc = nats_poll::connect(server.url().as_str()).unwrap();
        let msg = &bmsg[0..*size];
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter_custom(|n| {
                let start = Instant::now();
                for _i in 0..n {
                    nc.publish("bench", msg).unwrap();
                }
                nc.flush(Duration::from_secs(10)).unwrap();
                start.elapsed()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, decode_benchmark, pub_benchmark);
criterion_main!(benches);
