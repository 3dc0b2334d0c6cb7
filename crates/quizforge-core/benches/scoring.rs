use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use quizforge_core::completion::{CompletionScore, EngagementSignals};
use quizforge_core::grading::{overall_feedback, weak_topics};
use quizforge_core::model::{Difficulty, QuestionOutcome};
use quizforge_core::variant::QuizRequest;

fn bench_completion(c: &mut Criterion) {
    let mut group = c.benchmark_group("completion");

    let typical = EngagementSignals::new(420, 73.5, 3);
    let idle = EngagementSignals::new(0, 0.0, 0);
    let long_chapter = EngagementSignals::new(5400, 100.0, 40).with_page_count(50);

    group.bench_function("typical", |b| {
        b.iter(|| CompletionScore::compute(black_box(&typical)))
    });

    group.bench_function("idle", |b| {
        b.iter(|| CompletionScore::compute(black_box(&idle)))
    });

    group.bench_function("descriptor", |b| {
        b.iter(|| {
            CompletionScore::compute(black_box(&long_chapter))
                .descriptor()
                .to_string()
        })
    });

    group.finish();
}

fn bench_variant_hash(c: &mut Criterion) {
    let request = QuizRequest::new("chapter-physics-motion", Difficulty::Medium, 5, 3, 2);
    c.bench_function("variant_hash", |b| {
        b.iter(|| black_box(&request).content_hash())
    });
}

fn generate_results(n: usize) -> BTreeMap<String, QuestionOutcome> {
    let topics = ["kinematics", "forces", "energy", "waves", "optics"];
    (0..n)
        .map(|i| {
            let score = (i % 4) as f64 / 3.0;
            (
                format!("q{i}"),
                QuestionOutcome {
                    score,
                    max_score: 1.0,
                    feedback: String::new(),
                    is_correct: score >= 0.6,
                    topic: topics[i % topics.len()].to_string(),
                },
            )
        })
        .collect()
}

fn bench_attempt_aggregation(c: &mut Criterion) {
    let mut group = c.benchmark_group("attempt_aggregation");

    let small = generate_results(10);
    let large = generate_results(30);

    group.bench_function("10_questions", |b| {
        b.iter(|| {
            let weak = weak_topics(black_box(&small));
            overall_feedback(55.0, &weak, &small)
        })
    });

    group.bench_function("30_questions", |b| {
        b.iter(|| {
            let weak = weak_topics(black_box(&large));
            overall_feedback(82.0, &weak, &large)
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_completion,
    bench_variant_hash,
    bench_attempt_aggregation
);
criterion_main!(benches);
