use criterion::{black_box, criterion_group, criterion_main, Criterion};

use fex::{compile, DataType, Input, OutputBuffer};

fn bench_eval_batch(c: &mut Criterion) {
    let variables = [("x", DataType::Float), ("y", DataType::Float)];
    let program = compile(
        "sqrt(x * x + y * y) * 0.5 + min(x, y)",
        &variables,
        DataType::Float,
    )
    .expect("benchmark expression must compile");

    let rows = 4096;
    let xs: Vec<f32> = (0..rows).map(|i| i as f32 * 0.25).collect();
    let ys: Vec<f32> = (0..rows).map(|i| (rows - i) as f32 * 0.5).collect();
    let mask: Vec<usize> = (0..rows).collect();
    let mut results = vec![0.0f32; rows];

    c.bench_function("eval_batch_4096", |b| {
        b.iter(|| {
            let inputs = [Input::Float(&xs), Input::Float(&ys)];
            let mut out = OutputBuffer::Float(&mut results);
            program.eval_batch(black_box(&inputs), &mask, &mut out);
        })
    });
}

criterion_group!(benches, bench_eval_batch);
criterion_main!(benches);
