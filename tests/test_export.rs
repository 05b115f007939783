//! Integration tests for the frozen-artifact export path: a trained model
//! must survive freezing, JSON round-tripping, and quantization with the
//! declared accuracy contracts.

use linkadapt::config::LinkAdaptConfig;
use linkadapt::dataset::{LinkDataset, SyntheticLinkDataset};
use linkadapt::export::{ArtifactInputs, FrozenArtifact, QuantizedArtifact};
use linkadapt::model::BatchInputs;
use linkadapt::trainer::Trainer;
use tch::Device;

fn trained_model(variant: u8) -> linkadapt::model::LinkAdaptModel {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = LinkAdaptConfig::default();
    cfg.network_variant = variant;
    cfg.batch_size = 4;
    cfg.max_epochs = 2;
    cfg.save_interval = 2;
    cfg.model_dir = tmp.path().to_path_buf();

    let ds = SyntheticLinkDataset::new(16);
    let mut trainer = Trainer::offline(&cfg).unwrap();
    trainer.train_offline(&ds).unwrap();
    trainer.into_model()
}

/// The frozen forward path must match the trained in-memory graph within
/// 1e-5 on both outputs.
#[test]
fn trained_artifact_matches_model_within_tolerance() {
    let model = trained_model(5);
    let artifact = FrozenArtifact::from_model(&model).unwrap();

    let ds = SyntheticLinkDataset::new(6);
    for idx in 0..6 {
        let sample = ds.get(idx).unwrap();
        let inputs = BatchInputs::from_samples(std::slice::from_ref(&sample), Device::Cpu);
        let pred = model.forward_inference(&inputs);
        let amp = pred.amp.double_value(&[0, 0]) as f32;
        let es: Vec<f32> = Vec::try_from(pred.es_scores.flatten(0, -1)).unwrap();

        let out = artifact.forward(&ArtifactInputs::from_sample(&sample)).unwrap();
        assert!(
            (out.amp - amp).abs() < 1e-5,
            "sample {idx}: frozen amp {} vs model {amp}",
            out.amp
        );
        for (a, b) in out.es_scores.iter().zip(es.iter()) {
            assert!((a - b).abs() < 1e-5, "sample {idx}: frozen es {a} vs model {b}");
        }
    }
}

/// The deterministic v7 artifact must agree with the model's inference
/// path, where the power sample is likewise folded to its mean.
#[test]
fn v7_artifact_folds_sampling_to_the_mean() {
    let model = trained_model(7);
    let artifact = FrozenArtifact::from_model(&model).unwrap();
    assert!(artifact.deterministic);

    let sample = SyntheticLinkDataset::new(1).get(0).unwrap();
    let inputs = BatchInputs::from_samples(std::slice::from_ref(&sample), Device::Cpu);
    let pred = model.forward_inference(&inputs);
    let mu = pred.mu.unwrap().double_value(&[0, 0]) as f32;

    let out = artifact.forward(&ArtifactInputs::from_sample(&sample)).unwrap();
    assert!((out.amp - mu).abs() < 1e-5, "artifact amp {} vs mu {mu}", out.amp);
}

/// A full save → load → quantize → save → load chain must keep inference
/// working and the simplex contract intact.
#[test]
fn artifact_files_round_trip_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let float_path = tmp.path().join("frozen.json");
    let int8_path = tmp.path().join("frozen.int8.json");

    let model = trained_model(4);
    let artifact = FrozenArtifact::from_model(&model).unwrap();
    artifact.save(&float_path).unwrap();
    artifact.quantize().save(&int8_path).unwrap();

    let float_back = FrozenArtifact::load(&float_path).unwrap();
    let int8_back = QuantizedArtifact::load(&int8_path).unwrap();

    let sample = SyntheticLinkDataset::new(1).get(0).unwrap();
    let x = ArtifactInputs::from_sample(&sample);

    let reference = artifact.forward(&x).unwrap();
    let float_out = float_back.forward(&x).unwrap();
    assert!((reference.amp - float_out.amp).abs() < 1e-7);

    let int8_out = int8_back.dequantize().forward(&x).unwrap();
    assert!(int8_out.amp.is_finite());
    let sum: f32 = int8_out.es_scores.iter().sum();
    assert!((sum - 1.0).abs() < 1e-5, "quantized es_scores must stay a simplex");
}
