use std::{fs, path::PathBuf};

use machine_learning::arch::SuperResolution;
use orchestrator::{
    OrchestratorError, TrainingEvent,
    configs::{ActFnConfig, Config, DatasetConfig, ModelConfig, OptimizerConfig, ParamGenConfig},
    train,
};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("session-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn small_config(save_dir: Option<&PathBuf>) -> String {
    let save_dir = match save_dir {
        Some(dir) => format!(r#", "save_dir": {:?}"#, dir.display().to_string()),
        None => String::new(),
    };

    format!(
        r#"{{
            "model": {{ "rlsp": {{ "scale": 2, "channel": 1, "layers": 3, "filters": 4, "seed": 3 }} }},
            "training": {{
                "dataset": {{ "synthetic": {{ "clips": 5, "frames": 4, "size": [8, 8] }} }},
                "optimizer": {{ "adam": {{ "lr": 0.001 }} }},
                "epochs": 4,
                "batch_size": 2,
                "eval_clips": 1,
                "eval_every": 2,
                "lr_decay": {{ "every": 3, "factor": 0.5 }},
                "seed": 4{save_dir}
            }}
        }}"#
    )
}

#[test]
fn defaults_are_filled_in() {
    let config = Config::from_json(
        r#"{
            "model": { "rlsp": { "scale": 4, "channel": 3 } },
            "training": {
                "dataset": { "local": { "path": "clips.safetensors" } },
                "epochs": 10,
                "batch_size": 8
            }
        }"#,
    )
    .unwrap();

    assert_eq!(
        config.model,
        ModelConfig::Rlsp {
            scale: 4,
            channel: 3,
            clips: 3,
            layers: 7,
            filters: 64,
            act_fn: ActFnConfig::Relu,
            init: ParamGenConfig::Kaiming,
            seed: None,
        }
    );
    assert_eq!(config.training.optimizer, OptimizerConfig::default());
    assert_eq!(config.training.optimizer.learning_rate(), 1e-4);
    assert_eq!(config.training.eval_every.get(), 1);
    assert_eq!(config.training.eval_clips, 0);
    assert!(config.training.lr_decay.is_none());
    assert!(matches!(
        config.training.dataset,
        DatasetConfig::Local { .. }
    ));
}

#[test]
fn malformed_configs_are_rejected() {
    let zero_epochs = small_config(None).replace(r#""epochs": 4"#, r#""epochs": 0"#);
    assert!(matches!(
        Config::from_json(&zero_epochs),
        Err(OrchestratorError::Json(_))
    ));

    let unknown_model = small_config(None).replace(r#""rlsp""#, r#""frvsr""#);
    assert!(Config::from_json(&unknown_model).is_err());

    let missing_dataset = Config::from_json(&small_config(None)).map(|mut config| {
        config.training.dataset = DatasetConfig::Local {
            path: temp_dir("missing").join("clips.safetensors"),
        };
        config
    });
    assert!(matches!(
        train(missing_dataset.unwrap()),
        Err(OrchestratorError::Ml(_))
    ));
}

#[test]
fn session_reports_every_event() {
    let dir = temp_dir("events");
    let config = Config::from_json(&small_config(Some(&dir))).unwrap();

    let mut events = Vec::new();
    let model = train(config).unwrap().run(|event| events.push(event)).unwrap();

    let epochs: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            TrainingEvent::EpochFinished(report) => Some(report.epoch),
            _ => None,
        })
        .collect();
    assert_eq!(epochs, [1, 2, 3, 4]);

    let evaluated: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            TrainingEvent::Evaluated { epoch, psnr } => {
                assert!(psnr.is_finite());
                Some(*epoch)
            }
            _ => None,
        })
        .collect();
    assert_eq!(evaluated, [2, 4]);

    assert!(events.contains(&TrainingEvent::LearningRateDecayed {
        epoch: 3,
        learning_rate: 0.0005,
    }));
    assert_eq!(model.learning_rate(), 0.0005);

    let checkpoint = dir.join("checkpoints").join("rlsp_ep0004.safetensors");
    assert!(checkpoint.exists());
    assert!(dir.join("summary").join("scalars.csv").exists());
    assert!(dir.join("summary").join("clean_000004_0.pgm").exists());

    let other = small_config(None)
        .replace(r#""seed": 3"#, r#""seed": 30"#)
        .replace(r#""epochs": 4"#, r#""epochs": 1"#);
    let mut restored = train(Config::from_json(&other).unwrap())
        .unwrap()
        .wait()
        .unwrap();
    assert_ne!(restored.params(), model.params());

    restored.load(&checkpoint).unwrap();
    assert_eq!(restored.params(), model.params());

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn only_the_last_eval_batch_is_written() {
    let dir = temp_dir("eval-batches");
    let config = Config::from_json(
        &small_config(Some(&dir))
            .replace(r#""eval_clips": 1"#, r#""eval_clips": 3"#)
            .replace(r#""epochs": 4"#, r#""epochs": 2"#),
    )
    .unwrap();

    let mut psnrs = Vec::new();
    train(config)
        .unwrap()
        .run(|event| {
            if let TrainingEvent::Evaluated { psnr, .. } = event {
                psnrs.push(psnr);
            }
        })
        .unwrap();
    assert_eq!(psnrs.len(), 1);
    assert!(psnrs[0].is_finite());

    // batches of 2 and 1 clips
    let summary = dir.join("summary");
    assert!(summary.join("clean_000002_0.pgm").exists());
    assert!(summary.join("label_000002_0.pgm").exists());
    assert!(!summary.join("clean_000002_1.pgm").exists());
    assert!(!summary.join("label_000002_1.pgm").exists());

    fs::remove_dir_all(dir).unwrap();
}

#[test]
fn training_lowers_the_loss() {
    let config = Config::from_json(
        &small_config(None)
            .replace(r#""epochs": 4"#, r#""epochs": 25"#)
            .replace(r#""eval_clips": 1"#, r#""eval_clips": 0"#)
            .replace(r#""every": 3"#, r#""every": 100"#),
    )
    .unwrap();

    let mut losses = Vec::new();
    train(config)
        .unwrap()
        .run(|event| {
            if let TrainingEvent::EpochFinished(report) = event {
                losses.push(report.image_loss);
            }
        })
        .unwrap();

    assert_eq!(losses.len(), 25);
    assert!(losses[24] < losses[0]);
}
