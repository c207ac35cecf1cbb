use rand::Rng;
use std::time::Duration;

/// Delay before the next attempt, as a function of retries already made
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay every time
    Constant(Duration),

    /// `step * (attempt + 1)`, capped at `max`
    Linear { step: Duration, max: Duration },

    /// `base * 2^attempt`, capped at `max`, plus up to `jitter` (a fraction
    /// of the capped delay, in `[0, 1)`) of random extra wait
    Exponential {
        base: Duration,
        max: Duration,
        jitter: f64,
    },
}

impl Backoff {
    /// Returns the delay to wait after the attempt numbered `attempt` failed
    ///
    /// `attempt` is 0 for the first try. Without a cap in the way,
    /// exponential delays strictly increase with `attempt` even with jitter,
    /// because each doubling outgrows any jitter below 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Self::Constant(delay) => *delay,
            Self::Linear { step, max } => step.saturating_mul(attempt.saturating_add(1)).min(*max),
            Self::Exponential { base, max, jitter } => {
                let multiplier = 2_u32.saturating_pow(attempt);
                let capped = base.saturating_mul(multiplier).min(*max);

                if *jitter > 0.0 {
                    let factor = rand::rng().random_range(0.0..*jitter);
                    capped.saturating_add(capped.mul_f64(factor))
                } else {
                    capped
                }
            }
        }
    }
}
