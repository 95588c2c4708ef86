// End-to-end tests for the monitoring pipeline
// These tests drive sessions tick by tick and check what consumers receive

#[cfg(test)]
mod tests {
    use crate::config::{EngineConfig, ModelConfig};
    use crate::features::{FeatureVector, FeatureWindow};
    use crate::history::ContractionPeaks;
    use crate::inference::InferenceEngine;
    use crate::medication::{parse_medications, MedicationSet};
    use crate::models::{
        BackendKind, FetalHealth, ForecastArtifact, ForecastLabel, Horizon, LogisticModel,
        SoftmaxModel,
    };
    use crate::session::{CombinedRecord, MonitorSession};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Arc;

    fn degraded_session(subject: &str, medications: MedicationSet) -> MonitorSession {
        MonitorSession::new(
            subject,
            &EngineConfig::default(),
            Arc::new(InferenceEngine::degraded()),
            medications,
        )
    }

    fn run(session: &mut MonitorSession, ticks: usize) -> Vec<CombinedRecord> {
        (0..ticks).map(|_| session.tick()).collect()
    }

    // Reference classifier that always leans Pathological
    fn write_reference_classifier(dir: &Path, name: &str) {
        let model = SoftmaxModel {
            version: "test".to_string(),
            classes: vec![
                "normal".to_string(),
                "suspect".to_string(),
                "pathological".to_string(),
            ],
            means: vec![],
            scales: vec![],
            coefficients: vec![vec![0.0; FeatureVector::LEN]; 3],
            intercepts: vec![0.0, 0.0, 5.0],
        };
        let json = serde_json::to_string(&model).unwrap();
        std::fs::write(dir.join(format!("{}.json", name)), json).unwrap();
    }

    fn write_forecaster(dir: &Path, horizon: u32, window_sec: u64) {
        let mut models = BTreeMap::new();
        models.insert(
            "any_pathology".to_string(),
            LogisticModel {
                means: vec![],
                scales: vec![],
                coefficients: vec![0.0; FeatureVector::LEN],
                intercept: 0.0,
            },
        );
        let artifact = ForecastArtifact {
            version: "test".to_string(),
            window_sec,
            labels: vec!["any_pathology".to_string()],
            models,
        };
        let json = serde_json::to_string(&artifact).unwrap();
        std::fs::write(dir.join(format!("forecast_model_{}.json", horizon)), json).unwrap();
    }

    #[test]
    fn test_ten_seconds_is_one_hundred_samples() {
        let mut session = degraded_session("patient-001", MedicationSet::new());
        let records = run(&mut session, 100);

        assert_eq!(records.len(), 100);
        assert_eq!(records[0].sample.t_ms, 0);
        assert_eq!(records[99].sample.t_ms, 9_900);
    }

    #[test]
    fn test_warmup_sequence() {
        let mut session = degraded_session("patient-001", MedicationSet::new());
        let records = run(&mut session, 120);

        for r in &records[..30] {
            assert!(r.sample.fhr_bpm <= 95, "fhr {} at {}", r.sample.fhr_bpm, r.sample.t_ms);
            assert_eq!(r.primary_description, "fetal bradycardia (test)");
        }
        for r in &records[30..60] {
            assert!(r.sample.fhr_bpm >= 170);
            assert_eq!(r.primary_description, "fetal tachycardia (test)");
        }
        for r in &records[60..80] {
            assert_eq!(r.sample.fhr_bpm, 140);
            assert_eq!(r.primary_description, "reduced variability (test)");
        }
        for r in &records[80..100] {
            assert!((50.0..=70.0).contains(&r.sample.uc_mmhg));
            assert_eq!(r.primary_description, "uterine tachysystole (test)");
        }
        for r in &records[100..] {
            assert!(r.sample.pathologies.iter().all(|t| !t.forced));
        }
    }

    #[test]
    fn test_same_subject_same_samples() {
        let mut a = degraded_session("patient-042", MedicationSet::new());
        let mut b = degraded_session("patient-042", MedicationSet::new());
        let mut c = degraded_session("patient-043", MedicationSet::new());

        let ra: Vec<_> = run(&mut a, 600).into_iter().map(|r| r.sample).collect();
        let rb: Vec<_> = run(&mut b, 600).into_iter().map(|r| r.sample).collect();
        let rc: Vec<_> = run(&mut c, 600).into_iter().map(|r| r.sample).collect();

        assert_eq!(ra, rb);
        assert_ne!(ra, rc);
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn test_inference_cadence() {
        let mut session = degraded_session("patient-001", MedicationSet::new());
        let records = run(&mut session, 100);

        // 2 Hz over 10 s of simulated time
        assert_eq!(session.stats().total_inferences, 20);
        let fresh = records
            .iter()
            .filter(|r| r.inference.inferred_at_ms == Some(r.sample.t_ms))
            .count();
        assert_eq!(fresh, 20);
        for pair in records.windows(2) {
            if pair[1].inference.inferred_at_ms != Some(pair[1].sample.t_ms) {
                assert_eq!(pair[0].inference, pair[1].inference);
            }
        }
    }

    #[test]
    fn test_missing_artifacts_degrade() {
        let dir = tempfile::tempdir().unwrap();
        let engine = InferenceEngine::load(&ModelConfig {
            model_dir: Some(dir.path().to_path_buf()),
            ..ModelConfig::default()
        });

        let diag = engine.diagnostics();
        assert!(diag.degraded);
        assert_eq!(diag.active_backend, BackendKind::Degraded);
        assert!(diag.loaded_forecast_horizons.is_empty());
        assert!(diag.files.values().all(|f| !f.exists));

        let mut session = MonitorSession::new(
            "patient-001",
            &EngineConfig::default(),
            Arc::new(engine),
            MedicationSet::new(),
        );
        let record = session.tick();
        let class = record.inference.classification.unwrap();
        assert_eq!(class.label, FetalHealth::Normal);
        assert!((class.confidence - 1.0 / 3.0).abs() < 1e-9);
        assert!(record.inference.forecast.is_empty());
        assert!(record.alert.is_none());
    }

    #[test]
    fn test_reference_and_forecast_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            models: ModelConfig {
                model_dir: Some(dir.path().to_path_buf()),
                ..ModelConfig::default()
            },
            ..EngineConfig::default()
        };
        write_reference_classifier(dir.path(), &config.models.model_name);
        write_forecaster(dir.path(), 10, 600);

        let engine = Arc::new(InferenceEngine::load(&config.models));
        let diag = engine.diagnostics();
        assert!(!diag.degraded);
        assert_eq!(diag.active_backend, BackendKind::Reference);
        assert_eq!(diag.loaded_forecast_horizons, vec![10]);
        assert!(diag.files["classifier_reference"].exists);
        assert!(!diag.files["forecast_30"].exists);

        let mut session = MonitorSession::new("patient-001", &config, engine, MedicationSet::new());
        assert_eq!(session.feature_window().context_ms(), 600_000);

        let first = session.tick();
        let class = first.inference.classification.clone().unwrap();
        assert_eq!(class.label, FetalHealth::Pathological);
        assert_eq!(class.backend, BackendKind::Reference);
        assert!(!first.inference.recommendations.is_empty());

        let alert = first.alert.clone().unwrap();
        assert_eq!(alert.message, "Critical state: Pathological");
        assert_eq!(alert.at_ms, 0);

        let horizon = &first.inference.forecast[&Horizon(10)];
        assert!((horizon[&ForecastLabel::AnyPathology] - 0.5).abs() < 1e-9);
        assert!(!first.inference.forecast.contains_key(&Horizon(30)));

        // The alert rides on the inference tick only
        let second = session.tick();
        assert!(second.alert.is_none());
        assert_eq!(second.inference, first.inference);

        let value: serde_json::Value = serde_json::from_str(&first.to_ndjson_line().unwrap()).unwrap();
        assert_eq!(value["inference"]["forecast"]["10min"]["any_pathology"], 0.5);
        assert_eq!(value["alert"]["severity"], "CRITICAL");
        assert_eq!(value["inference"]["classification"]["backend"], "reference");
    }

    #[test]
    fn test_magnesium_suppresses_variability() {
        let magnesium = parse_medications(&["magnesium"]).unwrap();
        let mut treated = degraded_session("patient-001", magnesium);
        let mut untreated = degraded_session("patient-001", MedicationSet::new());

        let treated = run(&mut treated, 50);
        let untreated = run(&mut untreated, 50);

        for pair in treated.windows(2) {
            assert!(pair[1].sample.variability_bpm <= pair[0].sample.variability_bpm);
        }
        assert_eq!(treated[49].sample.variability_bpm, 2.0);
        assert!(untreated.iter().all(|r| r.sample.variability_bpm == 6.0));
    }

    #[test]
    fn test_tocolytic_scales_contractions() {
        let tocolytic = parse_medications(&["tocolytic"]).unwrap();
        let mut treated = degraded_session("patient-001", tocolytic);
        let mut untreated = degraded_session("patient-001", MedicationSet::new());

        let treated = run(&mut treated, 300);
        let untreated = run(&mut untreated, 300);

        // After warm-up both sessions draw the same noise
        for (t, u) in treated[100..].iter().zip(&untreated[100..]) {
            assert!(
                (t.sample.uc_mmhg - u.sample.uc_mmhg * 0.7).abs() < 0.01,
                "{} vs {}",
                t.sample.uc_mmhg,
                u.sample.uc_mmhg
            );
        }
    }

    #[test]
    fn test_medication_change_mid_session() {
        let mut session = degraded_session("patient-001", MedicationSet::new());
        run(&mut session, 10);
        let oxytocin = parse_medications(&["oxytocin"]).unwrap();
        session.set_medications(oxytocin.clone());

        let record = session.tick();
        assert_eq!(record.sample.medications, oxytocin);
        assert_eq!(record.sample.t_ms, 1_000);
    }

    #[test]
    fn test_empty_window_yields_zeros() {
        let window = FeatureWindow::new(300_000);
        assert!(window.aggregate().is_zero());
    }

    #[test]
    fn test_contraction_peak_spacing() {
        // Upward crossings 30 s apart count once
        let mut peaks = ContractionPeaks::new(55.0, 45_000, 60_000, 10.0);
        peaks.observe(0, 60.0);
        peaks.observe(1_000, 20.0);
        peaks.observe(30_000, 60.0);
        assert_eq!(peaks.count(), 1);

        // 50 s apart count twice
        let mut peaks = ContractionPeaks::new(55.0, 45_000, 60_000, 10.0);
        peaks.observe(0, 60.0);
        peaks.observe(1_000, 20.0);
        peaks.observe(50_000, 60.0);
        assert_eq!(peaks.count(), 2);
    }

    #[test]
    fn test_rolling_history_stays_bounded() {
        let mut session = degraded_session("patient-001", MedicationSet::new());
        run(&mut session, 3_000);

        assert_eq!(session.fhr_history().len(), 601);
        // 300 s context at 10 Hz
        assert_eq!(session.feature_window().len(), 3_000);
        run(&mut session, 100);
        assert_eq!(session.feature_window().len(), 3_001);
    }
}
