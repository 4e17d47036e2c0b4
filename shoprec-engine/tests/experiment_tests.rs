//! End-to-end tests for experiment assignment and analysis

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use shoprec_common::config::EngineConfig;
use shoprec_common::{time, Error};
use shoprec_engine::experiments::{
    Comparison, ExperimentStatus, MetricSample, NewExperiment, Verdict, VariantDefinition,
};
use shoprec_engine::RecommendationService;

fn new_experiment(id: &str, allocation: &[(&str, f64)]) -> NewExperiment {
    let now = time::now();
    NewExperiment {
        experiment_id: Some(id.to_string()),
        name: format!("{} experiment", id),
        description: "ranking strategy comparison".to_string(),
        variants: allocation.iter().map(|(name, _)| VariantDefinition::new(*name)).collect(),
        traffic_allocation: allocation.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        start_date: now - Duration::hours(1),
        end_date: now + Duration::days(14),
        success_metrics: vec!["purchase".to_string()],
        minimum_sample_size: 50,
        confidence_level: 0.95,
    }
}

async fn running_service(id: &str) -> RecommendationService {
    let service = RecommendationService::builder(EngineConfig::default())
        .build()
        .unwrap();
    service
        .create_experiment(new_experiment(id, &[("control", 0.5), ("treatment", 0.5)]))
        .await
        .unwrap();
    service.start_experiment(id).await.unwrap();
    service
}

fn sample(experiment_id: &str, variant: &str, value: f64) -> MetricSample {
    MetricSample {
        experiment_id: experiment_id.to_string(),
        variant_name: variant.to_string(),
        metric_name: "purchase".to_string(),
        value,
        timestamp: time::now(),
        user_id: None,
    }
}

#[tokio::test]
async fn test_thousand_users_split_evenly() {
    let service = running_service("split").await;

    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..1000 {
        let assignment = service.assign(&format!("user_{}", i), "split").await.unwrap();
        *counts.entry(assignment.variant_name).or_default() += 1;
    }

    assert_eq!(counts.len(), 2);
    for variant in ["control", "treatment"] {
        let n = counts[variant];
        assert!((400..=600).contains(&n), "{} got {}", variant, n);
    }
}

#[tokio::test]
async fn test_uneven_allocation_matches_shares() {
    let service = RecommendationService::builder(EngineConfig::default())
        .build()
        .unwrap();
    let allocation = [("control", 0.2), ("a", 0.3), ("b", 0.5)];
    service
        .create_experiment(new_experiment("uneven", &allocation))
        .await
        .unwrap();
    service.start_experiment("uneven").await.unwrap();

    let users = 10_000;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..users {
        let assignment = service.assign(&format!("user_{}", i), "uneven").await.unwrap();
        *counts.entry(assignment.variant_name).or_default() += 1;
    }

    assert_eq!(counts.len(), 3);
    for (variant, share) in allocation {
        let observed = counts[variant] as f64 / users as f64;
        assert!(
            (observed - share).abs() < 0.025,
            "{} expected {} got {}",
            variant,
            share,
            observed
        );
    }
}

#[tokio::test]
async fn test_assignment_is_stable() {
    let service = running_service("stable").await;
    for i in 0..50 {
        let user = format!("user_{}", i);
        let first = service.assign(&user, "stable").await.unwrap();
        let second = service.assign(&user, "stable").await.unwrap();
        assert_eq!(first, second);
    }
}

#[tokio::test]
async fn test_treatment_lift_is_detected() {
    let service = running_service("lift").await;
    let mut rng = StdRng::seed_from_u64(7);

    for _ in 0..50 {
        let control = 10.0 + rng.gen_range(-2.0..2.0);
        let treatment = 15.0 + rng.gen_range(-2.0..2.0);
        service.record_sample(sample("lift", "control", control)).await.unwrap();
        service.record_sample(sample("lift", "treatment", treatment)).await.unwrap();
    }

    let analysis = service.analyze("lift").await.unwrap();
    let metric = &analysis.metrics["purchase"];
    assert_eq!(metric.variants["control"].sample_size, 50);
    assert_eq!(metric.variants["treatment"].sample_size, 50);

    let lift = metric.comparisons["treatment"].lift().unwrap();
    assert!((lift - 0.5).abs() < 0.1, "lift was {}", lift);
    assert!(matches!(
        analysis.overall.recommendation,
        Verdict::Implement | Verdict::Continue
    ));
}

#[tokio::test]
async fn test_no_difference_recommends_stop() {
    let service = running_service("flat").await;
    for v in [10.0, 11.0, 9.0, 10.0] {
        service.record_sample(sample("flat", "control", v)).await.unwrap();
        service.record_sample(sample("flat", "treatment", v)).await.unwrap();
    }

    let analysis = service.analyze("flat").await.unwrap();
    match &analysis.metrics["purchase"].comparisons["treatment"] {
        Comparison::Tested {
            p_value,
            significant,
            ..
        } => {
            assert!((p_value - 1.0).abs() < 1e-9);
            assert!(!significant);
        }
        other => panic!("unexpected comparison: {:?}", other),
    }
    assert_eq!(analysis.overall.recommendation, Verdict::Stop);
    assert_eq!(analysis.overall.best_variant, None);
}

#[tokio::test]
async fn test_missing_samples_are_insufficient_data() {
    let service = running_service("sparse").await;
    service.record_sample(sample("sparse", "treatment", 3.0)).await.unwrap();

    let analysis = service.analyze("sparse").await.unwrap();
    assert!(matches!(
        analysis.metrics["purchase"].comparisons["treatment"],
        Comparison::InsufficientData { .. }
    ));
    assert_eq!(analysis.overall.recommendation, Verdict::Stop);
}

#[tokio::test]
async fn test_recorded_metrics_follow_assignment() {
    let service = running_service("attr").await;
    let assigned = service.assign("shopper", "attr").await.unwrap();
    let recorded = service
        .record_metric("shopper", "attr", "purchase", 25.0)
        .await
        .unwrap();
    assert_eq!(recorded.variant_name, assigned.variant_name);

    let analysis = service.analyze("attr").await.unwrap();
    let summary = analysis.metrics["purchase"].variants[&assigned.variant_name];
    assert_eq!(summary.sample_size, 1);
    assert_eq!(summary.sum, 25.0);
}

#[tokio::test]
async fn test_validation_reports_every_violation() {
    let service = RecommendationService::builder(EngineConfig::default())
        .build()
        .unwrap();
    let mut bad = new_experiment("bad", &[("control", 0.7), ("treatment", 0.7)]);
    bad.end_date = bad.start_date - Duration::days(1);
    bad.success_metrics.clear();

    let err = service.create_experiment(bad).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert_eq!(err.violations().len(), 3);
    assert!(service.list_experiments().await.is_empty());
}

#[tokio::test]
async fn test_lifecycle_and_final_analysis() {
    let service = running_service("life").await;
    service.pause_experiment("life").await.unwrap();
    assert_eq!(
        service.assign("newcomer", "life").await.unwrap().variant_name,
        "control"
    );

    service.start_experiment("life").await.unwrap();
    let analysis = service.complete_experiment("life").await.unwrap();
    assert_eq!(analysis.status, ExperimentStatus::Completed);

    assert!(matches!(
        service.stop_experiment("life").await,
        Err(Error::InvalidState(_))
    ));
    assert!(matches!(
        service.analyze("unknown").await,
        Err(Error::NotFound(_))
    ));
}
