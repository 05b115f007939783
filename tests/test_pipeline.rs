//! End-to-end pipeline tests: offline training, snapshot lifecycle,
//! evaluation, and online fine-tuning, all on the deterministic synthetic
//! dataset. No OS entropy is involved; every run is reproducible from the
//! config seed.

use linkadapt::config::LinkAdaptConfig;
use linkadapt::dataset::{LinkDataset, SyntheticLinkDataset};
use linkadapt::eval::Evaluator;
use linkadapt::model::{BatchInputs, LinkAdaptModel, NetVariant};
use linkadapt::trainer::{OnlineBatch, Trainer};
use tch::Device;

fn pipeline_config(model_dir: &std::path::Path) -> LinkAdaptConfig {
    let mut cfg = LinkAdaptConfig::default();
    cfg.network_variant = 7;
    cfg.batch_size = 4;
    cfg.max_epochs = 4;
    cfg.save_interval = 2;
    cfg.model_dir = model_dir.to_path_buf();
    cfg
}

/// A short offline run on the synthetic set must reduce the mean loss
/// between the first and last epoch.
#[test]
fn offline_training_reduces_loss() {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = pipeline_config(tmp.path());
    cfg.network_variant = 4;
    let ds = SyntheticLinkDataset::new(32);

    let mut trainer = Trainer::offline(&cfg).unwrap();
    trainer.train_offline(&ds).unwrap();

    let history = &trainer.state().loss_history;
    assert_eq!(history.len(), 4);
    assert!(
        history.last().unwrap() < &history[0],
        "loss should decrease: {history:?}"
    );
}

/// A reloaded snapshot must reproduce the inference outputs of the model
/// that wrote it.
#[test]
fn snapshot_round_trip_reproduces_inference() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = pipeline_config(tmp.path());
    let ds = SyntheticLinkDataset::new(16);

    let mut trainer = Trainer::offline(&cfg).unwrap();
    trainer.train_offline(&ds).unwrap();
    let trained = trainer.into_model();

    // Epoch 4 snapshot exists per save_interval = 2.
    let reloaded =
        LinkAdaptModel::load(&cfg.snapshot_path(4), NetVariant::V7, Device::Cpu).unwrap();

    let samples: Vec<_> = (0..4).map(|i| ds.get(i).unwrap()).collect();
    let inputs = BatchInputs::from_samples(&samples, Device::Cpu);
    let a = trained.forward_inference(&inputs);
    let b = reloaded.forward_inference(&inputs);

    let amp_diff: f64 = (&a.amp - &b.amp).abs().max().double_value(&[]);
    let es_diff: f64 = (&a.es_scores - &b.es_scores).abs().max().double_value(&[]);
    assert!(amp_diff < 1e-6, "amp diverged by {amp_diff}");
    assert!(es_diff < 1e-6, "es_scores diverged by {es_diff}");
}

/// The evaluator must accept every snapshot the trainer wrote and report
/// percentage metrics for each.
#[test]
fn evaluator_consumes_training_snapshots() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = pipeline_config(tmp.path());
    let ds = SyntheticLinkDataset::new(16);

    let mut trainer = Trainer::offline(&cfg).unwrap();
    trainer.train_offline(&ds).unwrap();

    let holdout = SyntheticLinkDataset::new(8);
    let evaluator = Evaluator::new(&cfg).unwrap();
    let reports = evaluator.evaluate(&holdout, &[2, 4]).unwrap();

    assert_eq!(reports.len(), 2);
    for r in &reports {
        assert_eq!(r.num_samples, 8);
        assert!(r.amp_mean_error_pct.is_finite());
        assert!((0.0..=100.0).contains(&r.es_accuracy_pct));
    }
}

/// The online phase restores an offline snapshot and applies single
/// gradient steps from measured feedback without error.
#[test]
fn online_phase_continues_from_offline_snapshot() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg = pipeline_config(tmp.path());
    let ds = SyntheticLinkDataset::new(16);

    let mut offline = Trainer::offline(&cfg).unwrap();
    offline.train_offline(&ds).unwrap();

    let mut online = Trainer::online(&cfg, 4).unwrap();
    for step in 0..3 {
        let samples = vec![ds.get(step).unwrap(), ds.get(step + 1).unwrap()];
        let batch = OnlineBatch::new(samples, vec![2.0, 3.0], vec![1.9, 2.8]).unwrap();
        let components = online.apply_online_step(&batch).unwrap();
        assert!(components.total.is_finite(), "step {step} produced a non-finite loss");
        assert!(components.tp_penalty >= 0.0);
        assert!(components.pud_penalty >= 0.0);
    }
    assert_eq!(online.state().online_steps, 3);
}

/// Two offline runs with the same seed must produce identical loss
/// histories.
#[test]
fn training_is_reproducible_from_the_seed() {
    let ds = SyntheticLinkDataset::new(16);

    let run = |dir: &std::path::Path| {
        let mut cfg = pipeline_config(dir);
        cfg.network_variant = 4;
        cfg.max_epochs = 2;
        let mut trainer = Trainer::offline(&cfg).unwrap();
        trainer.train_offline(&ds).unwrap();
        trainer.state().loss_history.clone()
    };

    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_b = tempfile::tempdir().unwrap();
    assert_eq!(run(tmp_a.path()), run(tmp_b.path()));
}
