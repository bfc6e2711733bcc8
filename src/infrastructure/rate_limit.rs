//! Process-wide request budget for exchange clients.
//!
//! Four constraints are enforced simultaneously: a minimum spacing between
//! requests, a per-second request ceiling, a per-minute request ceiling, and
//! a per-minute weight ceiling. `acquire` blocks the caller until all four
//! admit the request. A 429 halves the effective minute ceiling for the
//! current window; the next successful request restores it.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub min_spacing: Duration,
    pub max_per_second: usize,
    pub max_per_minute: usize,
    pub max_weight_per_minute: u32,
}

impl Default for RateLimitConfig {
    /// Binance-shaped defaults: the minute ceiling sits at 67% of the
    /// documented 1200 cap so bursts from other processes never trip it.
    fn default() -> Self {
        Self {
            min_spacing: Duration::from_millis(100),
            max_per_second: 10,
            max_per_minute: 800,
            max_weight_per_minute: 1000,
        }
    }
}

/// Request weight of one kline fetch on the venue.
pub const CANDLE_REQUEST_WEIGHT: u32 = 2;

struct BudgetState {
    last_request: Option<Instant>,
    second_window: VecDeque<Instant>,
    minute_window: VecDeque<Instant>,
    weight_window: VecDeque<(Instant, u32)>,
    weight_in_window: u32,
    effective_minute_cap: usize,
    penalized: bool,
}

pub struct TokenBudget {
    config: RateLimitConfig,
    state: Mutex<BudgetState>,
}

impl TokenBudget {
    pub fn new(config: RateLimitConfig) -> Self {
        let effective_minute_cap = config.max_per_minute;
        Self {
            config,
            state: Mutex::new(BudgetState {
                last_request: None,
                second_window: VecDeque::new(),
                minute_window: VecDeque::new(),
                weight_window: VecDeque::new(),
                weight_in_window: 0,
                effective_minute_cap,
                penalized: false,
            }),
        }
    }

    /// Block until every constraint admits a request of `weight`.
    pub async fn acquire(&self, weight: u32) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                Self::prune(&mut state, now);

                match self.admission_delay(&state, now, weight) {
                    None => {
                        state.last_request = Some(now);
                        state.second_window.push_back(now);
                        state.minute_window.push_back(now);
                        state.weight_window.push_back((now, weight));
                        state.weight_in_window += weight;
                        return;
                    }
                    Some(delay) => delay,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Halve the effective minute ceiling for the current window.
    pub async fn penalize(&self) {
        let mut state = self.state.lock().await;
        state.effective_minute_cap = (state.effective_minute_cap / 2).max(1);
        state.penalized = true;
    }

    /// Restore the configured ceiling after a successful request.
    pub async fn restore(&self) {
        let mut state = self.state.lock().await;
        if state.penalized {
            state.effective_minute_cap = self.config.max_per_minute;
            state.penalized = false;
        }
    }

    pub async fn effective_minute_cap(&self) -> usize {
        self.state.lock().await.effective_minute_cap
    }

    fn prune(state: &mut BudgetState, now: Instant) {
        let second_ago = now.checked_sub(Duration::from_secs(1));
        let minute_ago = now.checked_sub(Duration::from_secs(60));

        if let Some(cutoff) = second_ago {
            while state.second_window.front().is_some_and(|&t| t <= cutoff) {
                state.second_window.pop_front();
            }
        }
        if let Some(cutoff) = minute_ago {
            while state.minute_window.front().is_some_and(|&t| t <= cutoff) {
                state.minute_window.pop_front();
            }
            while state.weight_window.front().is_some_and(|&(t, _)| t <= cutoff) {
                if let Some((_, w)) = state.weight_window.pop_front() {
                    state.weight_in_window -= w;
                }
            }
        }
    }

    /// How long until the request could be admitted, or None if now.
    fn admission_delay(&self, state: &BudgetState, now: Instant, weight: u32) -> Option<Duration> {
        let mut wait: Option<Duration> = None;
        let mut push = |d: Duration| {
            wait = Some(match wait {
                Some(w) if w >= d => w,
                _ => d,
            });
        };

        if let Some(last) = state.last_request {
            let since = now.duration_since(last);
            if since < self.config.min_spacing {
                push(self.config.min_spacing - since);
            }
        }

        if state.second_window.len() >= self.config.max_per_second
            && let Some(&oldest) = state.second_window.front()
        {
            push(Duration::from_secs(1).saturating_sub(now.duration_since(oldest)));
        }

        if state.minute_window.len() >= state.effective_minute_cap
            && let Some(&oldest) = state.minute_window.front()
        {
            push(Duration::from_secs(60).saturating_sub(now.duration_since(oldest)));
        }

        if state.weight_in_window + weight > self.config.max_weight_per_minute
            && let Some(&(oldest, _)) = state.weight_window.front()
        {
            push(Duration::from_secs(60).saturating_sub(now.duration_since(oldest)));
        }

        // Never sleep zero: a spurious wake must re-check, not spin
        wait.map(|d| d.max(Duration::from_millis(1)))
    }
}

impl Default for TokenBudget {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_min_spacing_enforced() {
        let budget = TokenBudget::new(RateLimitConfig {
            min_spacing: Duration::from_millis(100),
            max_per_second: 100,
            max_per_minute: 10_000,
            max_weight_per_minute: 100_000,
        });

        let start = Instant::now();
        for _ in 0..5 {
            budget.acquire(1).await;
        }
        // 4 gaps of >= 100ms between 5 requests
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_second_ceiling() {
        let budget = TokenBudget::new(RateLimitConfig {
            min_spacing: Duration::from_millis(1),
            max_per_second: 3,
            max_per_minute: 10_000,
            max_weight_per_minute: 100_000,
        });

        let start = Instant::now();
        for _ in 0..7 {
            budget.acquire(1).await;
        }
        // 7 requests at 3/s need to span at least 2 windows
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_weight_ceiling_blocks() {
        let budget = TokenBudget::new(RateLimitConfig {
            min_spacing: Duration::from_millis(1),
            max_per_second: 100,
            max_per_minute: 10_000,
            max_weight_per_minute: 10,
        });

        let start = Instant::now();
        for _ in 0..5 {
            budget.acquire(2).await;
        }
        assert!(start.elapsed() < Duration::from_secs(30));

        // The 6th pushes past the weight window and must wait ~a minute
        budget.acquire(2).await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_halves_and_restore_resets() {
        let budget = TokenBudget::new(RateLimitConfig::default());
        assert_eq!(budget.effective_minute_cap().await, 800);

        budget.penalize().await;
        assert_eq!(budget.effective_minute_cap().await, 400);
        budget.penalize().await;
        assert_eq!(budget.effective_minute_cap().await, 200);

        budget.restore().await;
        assert_eq!(budget.effective_minute_cap().await, 800);

        // Restore without a pending penalty is a no-op
        budget.restore().await;
        assert_eq!(budget.effective_minute_cap().await, 800);
    }
}
