//! End-to-end decoding on synthetic subjects

use std::collections::HashSet;
use std::fs;

use fractal_bci_core::{FrequencyBand, Label, PipelineConfig};
use fractal_bci_native::pipeline::output::read_rows;
use fractal_bci_native::pipeline::{
    BatchRunner, JsonDirSource, ResultWriter, SubjectFile, SubjectPipeline, SubjectSource,
    SyntheticConfig, SyntheticSource,
};
use fractal_bci_native::PipelineError;

fn two_band_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.filter_bank.bands = vec![FrequencyBand::new(8.0, 13.0), FrequencyBand::new(18.0, 26.0)];
    config.spatial.n_components = 2;
    config.fractal.k_max = 20;
    config.cv.folds = 5;
    config.cv.seed = 42;
    config
}

fn forty_trials() -> SyntheticSource {
    SyntheticSource::new(SyntheticConfig {
        trials_per_class: 20,
        channels: 4,
        samples: 250,
        sfreq: 250.0,
        class_freqs: [10.0, 22.0],
        amplitude: 2.0,
        noise_std: 0.5,
        seed: 42,
    })
}

#[test]
fn test_forty_trial_scenario() {
    let data = forty_trials().load(1).unwrap();
    assert_eq!(data.class_counts(), [20, 20]);

    let pipeline = SubjectPipeline::new(two_band_config()).unwrap();
    let report = pipeline.run(&data).unwrap();

    // One held-out row per trial
    let rows = report.cv_result.rows();
    assert_eq!(rows.len(), 40);
    assert_eq!(report.result.len(), 40);
    assert_eq!(report.summary.failed_folds, 0);

    let folds: HashSet<usize> = rows.iter().map(|r| r.fold).collect();
    assert_eq!(folds.len(), 5);
    for fold in &report.summary.folds {
        assert_eq!(fold.n_trials, 8);
    }

    // Rows follow trial order, so labels line up with the source
    for (row, &label) in rows.iter().zip(data.labels()) {
        assert_eq!(row.true_label, label);
        assert_eq!(row.subject_id, 1);
    }

    for row in rows.iter().chain(report.result.rows()) {
        assert!((row.left_prob + row.right_prob - 1.0).abs() < 1e-6);
        assert!((0.0..=1.0).contains(&row.left_prob));
        assert!((0.0..=1.0).contains(&row.right_prob));
    }

    assert!(report.summary.cv_accuracy > 0.5, "accuracy {}", report.summary.cv_accuracy);
    assert!(report.result.accuracy() > 0.5);
}

#[test]
fn test_same_seed_same_predictions() {
    let data = forty_trials().load(3).unwrap();
    let pipeline = SubjectPipeline::new(two_band_config()).unwrap();
    let a = pipeline.run(&data).unwrap();
    let b = pipeline.run(&data).unwrap();
    assert_eq!(a.cv_result, b.cv_result);
    assert_eq!(a.result, b.result);
}

#[test]
fn test_subfilter_bank_runs() {
    let mut config = two_band_config();
    config.filter_bank.subbands = 2;
    config.refinement.enabled = false;
    let data = forty_trials().load(2).unwrap();

    let report = SubjectPipeline::new(config).unwrap().run(&data).unwrap();
    assert_eq!(report.result.len(), 40);
    assert!(!report.summary.refined);
}

#[test]
fn test_json_batch_with_missing_subject() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();

    // Export subject 1 with zero-based labels; subject 2 has no file
    let data = SyntheticSource::new(SyntheticConfig { trials_per_class: 6, samples: 200, ..Default::default() })
        .load(1)
        .unwrap();
    let file = SubjectFile {
        x: data
            .x()
            .outer_iter()
            .map(|trial| trial.outer_iter().map(|ch| ch.to_vec()).collect())
            .collect(),
        y: data.labels().iter().map(|l| i64::from(l.code()) - 1).collect(),
        sfreq: data.sfreq(),
    };
    fs::write(input.path().join("P01.json"), serde_json::to_string(&file).unwrap()).unwrap();

    let source = JsonDirSource::new(input.path());
    let loaded = source.load(1).unwrap();
    assert_eq!(loaded.labels(), data.labels());
    assert_eq!(loaded.labels()[0], Label::LeftHand);

    let mut config = two_band_config();
    config.fractal.k_max = 10;
    config.cv.folds = 3;
    let runner = BatchRunner::new(SubjectPipeline::new(config).unwrap()).sequential();
    let report = runner.run(&source, &[1, 2]);

    assert_eq!(report.successes().count(), 1);
    let failure = report.failures().next().unwrap();
    assert_eq!(failure.subject_id, 2);
    assert!(matches!(failure.source, PipelineError::DataNotFound { subject_id: 2, .. }));

    let writer = ResultWriter::new(output.path(), report.variant());
    let written = writer.write_report(&report).unwrap();
    assert_eq!(written.len(), 3);

    let text = fs::read_to_string(writer.subject_path(1)).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("subject_id,fold,true_label,left_prob,right_prob"));
    let first: Vec<&str> = lines.next().unwrap().split(',').collect();
    assert_eq!(first[0], "1");
    // Zero-based input labels are written as class codes
    assert_eq!(first[2], "1");
    assert!(text.lines().skip(1).all(|l| matches!(l.split(',').nth(2), Some("1" | "2"))));

    let subject_rows = read_rows(&writer.subject_path(1)).unwrap();
    assert_eq!(subject_rows.len(), 12);
    let combined = read_rows(&writer.combined_path()).unwrap();
    assert_eq!(combined, subject_rows);

    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(writer.summary_path()).unwrap()).unwrap();
    assert_eq!(summary["variant"], "FBCSP_Fractal");
    assert_eq!(summary["failures"][0]["subject_id"], 2);
}
