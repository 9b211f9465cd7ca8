//! Generate, execute, fix and learn across real components.

use chrono::Utc;
use pretty_assertions::assert_eq;
use test_mender::fix::{pattern_key, FixState, ProposalSource};
use test_mender::knowledge::{
    BoundedRing, FixKnowledge, FixPattern, FixedTestsStats, Insights, LearningStats,
    TestExecutionStats, FIXED_TESTS_STATS, FIX_KNOWLEDGE, LEARNING_STATS, TEST_EXECUTION_STATS,
};
use test_mender::orchestrator::OrchestratorConfig;
use test_mender::pipeline::{FixType, TestType, FALLBACK_CODE};

use super::{model, Pipeline, StubModel, OFF_BY_ONE_TEST};

const OFF_BY_ONE: &str = "def test_function(value):\n    return value + 1";

fn pattern(prefix: &str, fix_type: FixType, template: &str, successes: u64) -> FixPattern {
    FixPattern {
        prefix: prefix.to_string(),
        test_type: TestType::Function,
        fix_type,
        template: template.to_string(),
        insights: Insights::default(),
        examples: BoundedRing::new(),
        success_count: successes,
        failure_count: 0,
        consecutive_failures: 0,
        last_success: None,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_bare_shift_body_passes_doubling_spec() {
    let pipeline = Pipeline::new(model(StubModel::Unavailable), model(StubModel::Unavailable));
    let test = pipeline.record("return value << 1").await;

    let result = pipeline.executor.execute(&test).await;

    assert!(result.passed);
    assert_eq!(result.output, "20");
    assert!(result.failure_reason.is_none());
    assert!(result.error_signature.is_none());

    let stats: TestExecutionStats = pipeline
        .store
        .get_or_default(TEST_EXECUTION_STATS)
        .await
        .unwrap();
    assert_eq!(stats.tests_run, 1);
    assert_eq!(stats.tests_passed, 1);
}

#[tokio::test]
async fn test_model_timeout_falls_back_to_code_change() {
    let fix_model = model(StubModel::Timeout);
    let pipeline = Pipeline::new(model(StubModel::Unavailable), fix_model.clone());
    let test = pipeline.record(OFF_BY_ONE).await;
    let result = pipeline.executor.execute(&test).await;
    assert!(!result.passed);

    let outcome = pipeline.fixer.fix(&test, &result).await.unwrap();

    assert_eq!(outcome.source, ProposalSource::Fallback);
    assert_eq!(outcome.attempt.fix_type, FixType::CodeChange);
    assert!(outcome.attempt.analysis.contains("timed out"));
    assert!(outcome.attempt.success);
    assert_eq!(outcome.state(), FixState::Succeeded);
    assert_eq!(outcome.new_test.code, FALLBACK_CODE);
    assert_eq!(outcome.new_test.parent_id, Some(test.id));
    assert_eq!(fix_model.calls(), 1);

    let learned = pipeline.learner.learn(&outcome.attempt).await.unwrap();
    assert_eq!(learned.bucket, "function_code_change");
    assert!(!learned.from_model);
    assert!(learned.concept.is_some());
}

#[tokio::test]
async fn test_success_count_matches_credited_successes() {
    let pipeline = Pipeline::new(model(StubModel::Unavailable), model(StubModel::Timeout));

    let mut credited = Vec::new();
    for _ in 0..4 {
        let test = pipeline.record(OFF_BY_ONE).await;
        let result = pipeline.executor.execute(&test).await;
        let outcome = pipeline.fixer.fix(&test, &result).await.unwrap();
        assert!(outcome.attempt.success);
        credited.push(outcome.attempt.pattern.clone().unwrap());
    }

    // First fix learns the pattern, the rest reuse it.
    assert!(credited.windows(2).all(|pair| pair[0] == pair[1]));

    let knowledge: FixKnowledge = pipeline.store.get_or_default(FIX_KNOWLEDGE).await.unwrap();
    let stored = knowledge.pattern(&credited[0]).unwrap();
    assert_eq!(stored.success_count, 4);
    assert_eq!(stored.examples.len(), 4);
    assert_eq!(knowledge.fixes_attempted, 4);
    assert_eq!(knowledge.fixes_successful, 4);

    let lineage: FixedTestsStats = pipeline
        .store
        .get_or_default(FIXED_TESTS_STATS)
        .await
        .unwrap();
    assert_eq!(lineage.count, 4);
}

#[tokio::test]
async fn test_proven_pattern_wins_over_newcomer() {
    let fix_model = model(StubModel::Unavailable);
    let pipeline = Pipeline::new(model(StubModel::Unavailable), fix_model.clone());
    let test = pipeline.record(OFF_BY_ONE).await;
    let result = pipeline.executor.execute(&test).await;
    let key = pattern_key(result.error_signature.as_deref().unwrap());

    let proven = pattern(&key, FixType::CodeChange, FALLBACK_CODE, 141);
    let newcomer = pattern(&key, FixType::TestChange, "output == value + 1", 1);
    pipeline
        .store
        .update_as(FIX_KNOWLEDGE, move |knowledge: &mut FixKnowledge| {
            knowledge.insert_pattern(newcomer);
            knowledge.insert_pattern(proven);
            Ok(())
        })
        .await
        .unwrap();

    let outcome = pipeline.fixer.fix(&test, &result).await.unwrap();

    assert_eq!(outcome.source, ProposalSource::KnownPattern);
    assert_eq!(outcome.attempt.fix_type, FixType::CodeChange);
    assert!(outcome.attempt.success);
    assert_eq!(fix_model.calls(), 0);

    let knowledge: FixKnowledge = pipeline.store.get_or_default(FIX_KNOWLEDGE).await.unwrap();
    let reference = outcome.attempt.pattern.unwrap();
    assert_eq!(knowledge.pattern(&reference).unwrap().success_count, 142);
    assert_eq!(knowledge.pattern_count(), 2);
}

#[tokio::test]
async fn test_full_turn_repairs_every_generated_test() {
    let generator_model = model(StubModel::Answer(OFF_BY_ONE_TEST.to_string()));
    let pipeline = Pipeline::new(generator_model.clone(), model(StubModel::Timeout));
    let orchestrator = pipeline.orchestrator(OrchestratorConfig {
        tests_per_turn: 3,
        ..OrchestratorConfig::default()
    });

    let report = orchestrator.run_turn().await;

    assert_eq!(report.turn, 1);
    assert_eq!(report.executed, 3);
    assert_eq!(report.passed, 0);
    assert_eq!(report.failed, 3);
    assert_eq!(report.fix_attempts, 3);
    assert_eq!(report.repaired, 3);
    assert_eq!(report.unfixable, 0);
    assert!(!report.had_errors());
    assert_eq!(generator_model.calls(), 3);

    let knowledge: FixKnowledge = pipeline.store.get_or_default(FIX_KNOWLEDGE).await.unwrap();
    assert_eq!(knowledge.pattern_count(), 1);
    assert_eq!(knowledge.fixes_successful, 3);

    let learning: LearningStats = pipeline.store.get_or_default(LEARNING_STATS).await.unwrap();
    assert_eq!(learning.learning_sessions, 3);
    assert_eq!(learning.success_patterns["function_code_change"], 3);
}
