use rand::Rng;
use std::time::Duration;

/// Randomized wait before a claim re-reads the ledger, so two editors that
/// click the same folder at once do not write in lockstep.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    window: Duration,
}

impl Backoff {
    /// Uniform delay in `0..=window`.
    pub fn settle_window(window: Duration) -> Self {
        Self { window }
    }

    pub fn delay(&self) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(&mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let window_ms = self.window.as_millis().min(u128::from(u64::MAX)) as u64;
        if window_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(0..=window_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn settle_window_stays_within_window() {
        let backoff = Backoff::settle_window(Duration::from_millis(250));
        let mut rng = StdRng::seed_from_u64(7);
        let delays: Vec<_> = (0..32).map(|_| backoff.delay_with_rng(&mut rng)).collect();
        assert!(delays.iter().all(|delay| *delay <= Duration::from_millis(250)));
        assert!(delays.iter().any(|delay| *delay != delays[0]));
    }

    #[test]
    fn zero_window_never_waits() {
        let backoff = Backoff::settle_window(Duration::ZERO);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(backoff.delay_with_rng(&mut rng), Duration::ZERO);
    }
}
