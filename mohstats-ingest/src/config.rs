use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Batcher pool size.
    pub worker_count: usize,
    /// Capacity of the pending-event queue. Producers block when it fills.
    pub queue_size: usize,
    /// Max rows per analytic insert.
    pub batch_size: usize,
    /// Max time a buffered row waits before a flush.
    pub flush_interval_ms: u64,
    pub achievement_worker_count: usize,
    /// The achievement engine drops events (with a warning) beyond this;
    /// the analytic log plus baseline backfill recovers them later.
    pub achievement_queue_size: usize,
    pub db_pool_size: u32,
    pub cache_url: String,
    /// CORS allowlist for the ingest HTTP surface. The pipeline itself
    /// doesn't consume this; it's carried for the embedding service.
    pub allowed_origins: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            worker_count: 8,
            queue_size: 10_000,
            batch_size: 500,
            flush_interval_ms: 1_000,
            achievement_worker_count: 4,
            achievement_queue_size: 1_024,
            db_pool_size: 16,
            cache_url: "redis://127.0.0.1:6379".to_string(),
            allowed_origins: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn figment() -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file("MOHSTATS.toml"))
            .merge(Env::prefixed("MOHSTATS_"))
    }

    pub fn config() -> figment::Result<Self> {
        Self::figment().extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.queue_size, 10_000);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.flush_interval_ms, 1_000);
        assert_eq!(config.achievement_worker_count, 4);
    }
}
