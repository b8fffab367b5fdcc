use std::sync::Arc;

use rayon::prelude::*;

use crate::{
    interpreter::{Interpreter, Outcome},
    journal::World,
    message::Message,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Per-instance instruction budget; exceeded instances halt with
    /// `Aborted` and keep their partial trace.
    pub step_budget: Option<u64>,
}

/// Runs every instance of the batch on the rayon pool. Instances share
/// only the read-only base world; outcomes come back aligned with the
/// input order.
pub fn run_batch(world: Arc<World>, messages: Vec<Message>, options: BatchOptions) -> Vec<Outcome> {
    let total = messages.len();
    tracing::info!(instances = total, "batch start");
    let outcomes: Vec<Outcome> = messages
        .into_par_iter()
        .enumerate()
        .map(|(index, msg)| {
            let mut interpreter = Interpreter::new(world.clone());
            if let Some(budget) = options.step_budget {
                interpreter = interpreter.with_step_budget(budget);
            }
            let outcome = interpreter.run(msg);
            tracing::debug!(
                instance = index,
                error = ?outcome.error,
                steps = outcome.trace.len(),
                "instance finished"
            );
            outcome
        })
        .collect();
    tracing::info!(instances = total, "batch done");
    outcomes
}
