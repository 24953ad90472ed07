use super::interrupt::InterruptFlag;

/// Stops generation on an end-of-sequence token or as soon as the session is interrupted.
#[derive(Debug, Clone)]
pub struct InterruptibleEosCriteria {
    flag: InterruptFlag,
    eos_token_ids: Vec<u32>,
}

impl InterruptibleEosCriteria {
    pub fn new(flag: InterruptFlag, eos_token_ids: impl Into<Vec<u32>>) -> Self {
        Self {
            flag,
            eos_token_ids: eos_token_ids.into(),
        }
    }

    pub fn flag(&self) -> &InterruptFlag {
        &self.flag
    }

    /// Evaluates one decoding step for a batch of sequences.
    pub fn evaluate<S: AsRef<[u32]>>(&self, sequences: &[S]) -> Vec<bool> {
        if self.flag.is_interrupted() {
            tracing::debug!(batch = sequences.len(), "interrupt observed at token boundary");
            return vec![true; sequences.len()];
        }

        sequences
            .iter()
            .map(|sequence| {
                sequence
                    .as_ref()
                    .last()
                    .is_some_and(|token| self.eos_token_ids.contains(token))
            })
            .collect()
    }

    /// Single-sequence shorthand for [`Self::evaluate`].
    pub fn should_stop(&self, sequence: &[u32]) -> bool {
        self.evaluate(&[sequence]).first().copied().unwrap_or(false)
    }
}
