use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lazyflow::{AttributeKey, FunctionNode, Graph};

/// Linear chain of `len` doublers. Returns the graph, the head input and the
/// tail output.
fn chain(len: usize) -> (Graph, AttributeKey, AttributeKey) {
    let mut graph = Graph::new();
    let mut head = None;
    let mut previous: Option<AttributeKey> = None;

    for i in 0..len {
        let node = graph
            .add_node(format!("double{}", i), FunctionNode::unary(|x| x * 2.0), None)
            .unwrap();
        let input = graph.find_attribute(node, "input").unwrap();
        let output = graph.find_attribute(node, "output").unwrap();

        match previous {
            Some(previous) => graph.connect(previous, input).unwrap(),
            None => head = Some(input),
        }
        previous = Some(output);
    }

    (graph, head.unwrap(), previous.unwrap())
}

/// `width` independent chains fed from the same source attribute.
fn fan_out(width: usize, depth: usize) -> (Graph, AttributeKey, Vec<AttributeKey>) {
    let mut graph = Graph::new();
    let source = graph
        .add_node("source", FunctionNode::unary(|x| x), None)
        .unwrap();
    let source_in = graph.find_attribute(source, "input").unwrap();
    let source_out = graph.find_attribute(source, "output").unwrap();

    let mut tails = Vec::with_capacity(width);
    for w in 0..width {
        let mut previous = source_out;
        for d in 0..depth {
            let node = graph
                .add_node(format!("n{}_{}", w, d), FunctionNode::unary(|x| x + 1.0), None)
                .unwrap();
            let input = graph.find_attribute(node, "input").unwrap();
            graph.connect(previous, input).unwrap();
            previous = graph.find_attribute(node, "output").unwrap();
        }
        tails.push(previous);
    }

    (graph, source_in, tails)
}

fn bench_dirty_and_pull(c: &mut Criterion) {
    let mut group = c.benchmark_group("dirty_and_pull");

    for len in [1, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::new("chain", len), len, |b, &len| {
            let (mut graph, head, tail) = chain(len);
            let mut x = 0.0f32;

            b.iter(|| {
                x += 1.0;
                graph.set_value(head, x).unwrap();
                black_box(graph.value(tail));
            });
        });
    }

    group.finish();
}

fn bench_redundant_dirty(c: &mut Criterion) {
    let mut group = c.benchmark_group("redundant_dirty");

    group.bench_function("chain_100", |b| {
        let (mut graph, head, _tail) = chain(100);
        graph.set_value(head, 1.0f32).unwrap();

        // Downstream is already stale, so each write stops at the head.
        b.iter(|| {
            graph.set_value(head, black_box(2.0f32)).unwrap();
        });
    });

    group.finish();
}

fn bench_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_out");

    group.bench_function("16x8", |b| {
        let (mut graph, source, tails) = fan_out(16, 8);
        let mut x = 0.0f32;

        b.iter(|| {
            x += 1.0;
            graph.set_value(source, x).unwrap();
            for &tail in &tails {
                black_box(graph.value(tail));
            }
        });
    });

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology");

    group.bench_function("validate_fan_out_16x8", |b| {
        let (graph, _, _) = fan_out(16, 8);
        b.iter(|| {
            black_box(graph.validate().unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dirty_and_pull,
    bench_redundant_dirty,
    bench_fan_out,
    bench_validate
);
criterion_main!(benches);
