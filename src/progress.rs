use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// The ramp never reaches this value on its own; only a real response may
/// push it to 100.
pub const RAMP_CAP: u8 = 95;

const TICK_INTERVAL: Duration = Duration::from_millis(200);

/// Simulated progress shown while a backend call is outstanding. Monotone
/// while pending, capped below 100, snapped to 100 on success and reset to 0
/// on failure.
#[derive(Debug, Default, Clone)]
pub struct ProgressRamp {
    value: u8,
}

impl ProgressRamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u8 {
        self.value
    }

    /// Advance by a small random increment, saturating at the cap.
    pub fn tick(&mut self) -> u8 {
        let step: u8 = rand::rng().random_range(2..=8);
        self.value = self.value.saturating_add(step).min(RAMP_CAP);
        self.value
    }

    pub fn finish(&mut self) {
        self.value = 100;
    }

    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// Await `fut` while ticking the ramp on a fixed interval, reporting each
/// value through `on_tick`. The ticker lives inside this future's `select!`
/// loop, so resolving (or dropping) the call stops it with no timer left
/// behind to mutate state afterwards.
pub async fn drive<F, T>(fut: F, ramp: &mut ProgressRamp, mut on_tick: impl FnMut(u8)) -> T
where
    F: Future<Output = T>,
{
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    tokio::pin!(fut);
    loop {
        tokio::select! {
            out = &mut fut => return out,
            _ = interval.tick() => {
                on_tick(ramp.tick());
            }
        }
    }
}
