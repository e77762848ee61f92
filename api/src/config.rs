use std::time::Duration;

/// Tunable engine parameters, loaded once at startup. Budgets and caps are
/// operating knobs, not invariants — the defaults match production.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Hard cap on provider calls per turn
    pub max_iterations: u32,
    /// Estimated-token budget for transcript events since the last
    /// checkpoint; crossing it triggers a checkpoint
    pub context_token_budget: usize,
    /// Hard timeout for a single completion-provider call
    pub provider_timeout: Duration,
}

const MAX_ITERATIONS_ENV: &str = "FORMA_MAX_ITERATIONS";
const CONTEXT_TOKEN_BUDGET_ENV: &str = "FORMA_CONTEXT_TOKEN_BUDGET";
const PROVIDER_TIMEOUT_ENV: &str = "FORMA_PROVIDER_TIMEOUT_SECS";

const DEFAULT_MAX_ITERATIONS: u32 = 10;
const DEFAULT_CONTEXT_TOKEN_BUDGET: usize = 12_000;
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 60;

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            context_token_budget: DEFAULT_CONTEXT_TOKEN_BUDGET,
            provider_timeout: Duration::from_secs(DEFAULT_PROVIDER_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            max_iterations: env_parse(MAX_ITERATIONS_ENV, DEFAULT_MAX_ITERATIONS).clamp(1, 50),
            context_token_budget: env_parse(CONTEXT_TOKEN_BUDGET_ENV, DEFAULT_CONTEXT_TOKEN_BUDGET)
                .clamp(1_000, 200_000),
            provider_timeout: Duration::from_secs(
                env_parse(PROVIDER_TIMEOUT_ENV, DEFAULT_PROVIDER_TIMEOUT_SECS).clamp(1, 600),
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
