use std::{env, path::PathBuf};

use anyhow::{Context, Result, bail};
use log::info;
use machine_learning::arch::SuperResolution;
use orchestrator::{TrainingEvent, configs::Config, train};

fn main() -> Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1).map(PathBuf::from) else {
        bail!("usage: recurrent-vsr <config.json>");
    };

    let config = Config::from_file(&path)
        .with_context(|| format!("failed to load config {}", path.display()))?;

    let session = train(config)?;
    let model = session.run(|event| match event {
        TrainingEvent::EpochFinished(report) => println!(
            "epoch {:>4}  loss {:.6}  lr {:.2e}",
            report.epoch, report.image_loss, report.learning_rate
        ),
        TrainingEvent::Evaluated { epoch, psnr } => println!("epoch {epoch:>4}  psnr {psnr:.3}dB"),
        TrainingEvent::LearningRateDecayed { .. } | TrainingEvent::CheckpointSaved { .. } => {}
    })?;

    info!(model = model.name(), params = model.size(); "training finished");
    Ok(())
}
