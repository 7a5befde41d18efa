use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use research_orchestrator::research::plan::{
    sub_question_id, PlanOrigin, Priority, QueryComplexity, ResearchPlan, StatusUpdate, SubAnswer,
    SubQuestion,
};
use research_orchestrator::research::scheduler::{
    topological_order, DependencyScheduler, ResearchBudget,
};
use std::time::Duration;

/// Layered plan: every question depends on up to two questions from the previous layer.
fn layered_plan(size: usize, width: usize) -> ResearchPlan {
    let sub_questions = (1..=size)
        .map(|i| {
            let layer_start = ((i - 1) / width) * width;
            let deps = if layer_start == 0 {
                Vec::new()
            } else {
                let prev = layer_start - width + 1;
                vec![sub_question_id(prev), sub_question_id(prev + (i - 1) % width)]
            };
            let question = format!("Benchmark sub-question number {i}?");
            SubQuestion::new(i, question, "bench", Priority::Medium).with_dependencies(deps)
        })
        .collect();
    ResearchPlan::new(
        "bench",
        "benchmark query",
        QueryComplexity::Complex,
        sub_questions,
        PlanOrigin::Generated,
    )
}

fn budget() -> ResearchBudget {
    ResearchBudget {
        max_rounds: u32::MAX,
        max_cost: f64::MAX,
        max_duration: Duration::from_secs(3600),
    }
}

fn bench_topological_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("topological_order");
    for size in [5usize, 50, 500] {
        let plan = layered_plan(size, 5);
        group.bench_with_input(BenchmarkId::from_parameter(size), &plan, |b, plan| {
            b.iter(|| topological_order(black_box(plan)))
        });
    }
    group.finish();
}

fn bench_drain_rounds(c: &mut Criterion) {
    let mut group = c.benchmark_group("drain_rounds");
    for size in [5usize, 50, 500] {
        let plan = layered_plan(size, 5);
        group.bench_with_input(BenchmarkId::from_parameter(size), &plan, |b, plan| {
            b.iter(|| {
                let mut scheduler = DependencyScheduler::new(plan.clone(), budget());
                while scheduler.has_pending() {
                    for sq in scheduler.next_batch() {
                        let _ = scheduler.apply(&sq.id, StatusUpdate::Running);
                        let answer = SubAnswer::new("ok", 0.0);
                        let _ = scheduler.apply(&sq.id, StatusUpdate::Completed(answer));
                    }
                }
                scheduler.rounds()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_topological_order, bench_drain_rounds);
criterion_main!(benches);
