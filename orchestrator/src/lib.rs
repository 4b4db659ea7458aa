pub mod configs;
pub mod error;
mod session;

use configs::{Adapter, Config};

pub use error::OrchestratorError;
pub use session::{EpochReport, Session, TrainingEvent};

/// Builds everything a training run needs and returns a session ready to run it.
///
/// # Errors
/// Returns an `OrchestratorError` if the config is invalid or the dataset can't be loaded.
pub fn train(config: Config) -> Result<Session, OrchestratorError> {
    log::info!("adapting configs");
    let (model, train_set, eval_set) = Adapter::new().adapt_configs(&config)?;
    log::info!(
        "training on {} clip(s), evaluating on {}",
        train_set.len(),
        eval_set.as_ref().map_or(0, |eval_set| eval_set.len())
    );
    Session::new(model, train_set, eval_set, &config.training)
}
