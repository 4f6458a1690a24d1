use std::{fs, num::NonZeroUsize, path::Path};

use comms::FeatureMap;
use machine_learning::{
    Dataset, Dense, Engine, LocalEngine, MlErr, ModelFamily, SessionKind, TrainParams,
};

fn write_model(path: &Path, dim: (usize, usize)) {
    Dense::zeros(dim).to_artifact().unwrap().save(path).unwrap();
}

/// Two clusters split by the sign of the first feature.
fn write_separable(path: &Path) {
    let mut rows = String::new();
    for i in 0..20 {
        let v = 0.5 + i as f32 / 10.0;
        rows.push_str(&format!("{v},0.3,1\n-{v},-0.2,0\n"));
    }

    fs::write(path, rows).unwrap();
}

fn params() -> TrainParams {
    TrainParams {
        learning_rate: 0.5,
        epochs: 20,
        batch_size: NonZeroUsize::new(8).unwrap(),
        seed: 42,
    }
}

#[test]
fn logistic_training_lowers_the_loss() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.safetensors");
    let data = dir.path().join("train.csv");
    write_model(&model, (2, 1));
    write_separable(&data);

    let engine = LocalEngine::new(ModelFamily::Logistic);
    let mut session = engine.init_session(&model, SessionKind::Train).unwrap();
    let mut dataset = Dataset::load_csv(&data, 2).unwrap();

    let before = session.evaluate(&dataset).unwrap();
    let stats = session.train(&mut dataset, &params()).unwrap();
    let after = session.evaluate(&dataset).unwrap();

    assert_eq!(stats.samples, 40);
    assert_eq!(stats.losses.len(), 20);
    assert!(after.loss < before.loss);
    assert_eq!(after.accuracy, Some(1.0));
}

#[test]
fn linear_training_fits_a_line() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.safetensors");
    write_model(&model, (1, 1));

    let rows: String = (0..10)
        .map(|i| {
            let x = i as f32 / 10.0;
            format!("{x},{}\n", 3.0 * x + 1.0)
        })
        .collect();
    let data = dir.path().join("train.csv");
    fs::write(&data, rows).unwrap();

    let engine = LocalEngine::new(ModelFamily::Linear);
    let mut session = engine.init_session(&model, SessionKind::Train).unwrap();
    let mut dataset = Dataset::load_csv(&data, 1).unwrap();

    let stats = session
        .train(
            &mut dataset,
            &TrainParams {
                epochs: 300,
                ..params()
            },
        )
        .unwrap();

    assert!(stats.final_loss().unwrap() < 0.01);
    assert_eq!(session.evaluate(&dataset).unwrap().accuracy, None);
}

#[test]
fn dropping_sessions_releases_them() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.safetensors");
    write_model(&model, (3, 1));

    let engine = LocalEngine::new(ModelFamily::Linear);
    let train = engine.init_session(&model, SessionKind::Train).unwrap();
    let infer = engine.init_session(&model, SessionKind::Infer).unwrap();
    assert_eq!(engine.live_sessions(), 2);

    drop(train);
    assert_eq!(engine.live_sessions(), 1);
    drop(infer);
    assert_eq!(engine.live_sessions(), 0);
}

#[test]
fn failed_init_leaves_no_live_session() {
    let dir = tempfile::tempdir().unwrap();
    let engine = LocalEngine::new(ModelFamily::Linear);

    let err = engine
        .init_session(&dir.path().join("missing.safetensors"), SessionKind::Train)
        .unwrap_err();

    assert!(matches!(err, MlErr::Io(_)));
    assert_eq!(engine.live_sessions(), 0);
}

#[test]
fn inference_sessions_cannot_train() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.safetensors");
    let data = dir.path().join("train.csv");
    write_model(&model, (2, 1));
    write_separable(&data);

    let engine = LocalEngine::new(ModelFamily::Logistic);
    let mut session = engine.init_session(&model, SessionKind::Infer).unwrap();
    let mut dataset = Dataset::load_csv(&data, 2).unwrap();

    let err = session.train(&mut dataset, &params()).unwrap_err();
    assert!(matches!(err, MlErr::WrongSession { op: "train", .. }));
}

#[test]
fn saved_feature_map_survives_reopening() {
    let dir = tempfile::tempdir().unwrap();
    let model = dir.path().join("model.safetensors");
    write_model(&model, (2, 1));

    let engine = LocalEngine::new(ModelFamily::Logistic);
    let mut features = FeatureMap::new();
    features.insert("dense.weight", vec![4.0, -4.0]);
    features.insert("dense.bias", vec![0.0]);

    {
        let mut session = engine.init_session(&model, SessionKind::Train).unwrap();
        session.load_feature_map(&features).unwrap();
        session.save().unwrap();
    }

    let session = engine.init_session(&model, SessionKind::Infer).unwrap();
    assert_eq!(session.feature_map(), features);

    let data = dir.path().join("infer.csv");
    fs::write(&data, "1,0\n0,1\n").unwrap();
    let labels = session.infer(&Dataset::load_csv(&data, 2).unwrap()).unwrap();
    assert_eq!(labels, vec![1.0, 0.0]);
}
