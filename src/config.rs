//! Engine configuration.

use std::path::PathBuf;

/// Configuration for the posture engine.
///
/// All external endpoints, budgets and timeouts live here. The engine
/// never reads ambient globals - a config is built once at startup and
/// handed to [`crate::engine::Engine::init`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// SQLite database path. `None` means in-memory (tests, sandboxes).
    pub db_path: Option<PathBuf>,
    /// Root directory for content-addressed evidence blobs.
    pub blob_dir: PathBuf,
    /// FAA NAS status API base URL.
    pub faa_base_url: String,
    /// Aviation Weather Center API base URL (METAR + TAF).
    pub aviationweather_base_url: String,
    /// NWS alerts API base URL.
    pub nws_base_url: String,
    /// ADS-B state API base URL.
    pub adsb_base_url: String,
    /// Per-request HTTP timeout in seconds.
    pub http_timeout_secs: u64,
    /// Per-source ceiling for the ingestion fan-out, in seconds.
    pub source_ceiling_secs: u64,
    /// Narrative engine base URL.
    pub llm_base_url: String,
    /// Narrative engine API key.
    pub llm_api_key: String,
    /// Narrative engine model id.
    pub llm_model: String,
    /// Narrative engine call timeout in seconds.
    pub llm_timeout_secs: u64,
    /// Orchestrator iteration budget.
    pub max_iterations: u32,
    /// Orchestrator tool-call budget.
    pub max_tool_calls: u32,
    /// Maximum investigation rounds before verdicts are force-accepted.
    pub max_investigations: u32,
    /// Evidence cache window in seconds.
    pub evidence_cache_secs: i64,
    /// Whole-run ceiling for simulation runs, in seconds.
    pub simulation_ceiling_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            blob_dir: PathBuf::from("./blobs"),
            faa_base_url: "https://nasstatus.faa.gov".to_string(),
            aviationweather_base_url: "https://aviationweather.gov".to_string(),
            nws_base_url: "https://api.weather.gov".to_string(),
            adsb_base_url: "https://opensky-network.org".to_string(),
            http_timeout_secs: 10,
            source_ceiling_secs: 30,
            llm_base_url: "https://api.anthropic.com".to_string(),
            llm_api_key: String::new(),
            llm_model: "claude-3-5-sonnet-20241022".to_string(),
            llm_timeout_secs: 30,
            max_iterations: 10,
            max_tool_calls: 50,
            max_investigations: 2,
            evidence_cache_secs: 300,
            simulation_ceiling_secs: 90,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load endpoint overrides and the LLM key from the environment.
    ///
    /// Recognized variables: `POSTURE_DB_PATH`, `POSTURE_BLOB_DIR`,
    /// `FAA_BASE_URL`, `AVWX_BASE_URL`, `NWS_BASE_URL`, `ADSB_BASE_URL`,
    /// `LLM_BASE_URL`, `LLM_API_KEY`, `LLM_MODEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = std::env::var("POSTURE_DB_PATH") {
            config.db_path = Some(PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("POSTURE_BLOB_DIR") {
            config.blob_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("FAA_BASE_URL") {
            config.faa_base_url = v;
        }
        if let Ok(v) = std::env::var("AVWX_BASE_URL") {
            config.aviationweather_base_url = v;
        }
        if let Ok(v) = std::env::var("NWS_BASE_URL") {
            config.nws_base_url = v;
        }
        if let Ok(v) = std::env::var("ADSB_BASE_URL") {
            config.adsb_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_BASE_URL") {
            config.llm_base_url = v;
        }
        if let Ok(v) = std::env::var("LLM_API_KEY") {
            config.llm_api_key = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            config.llm_model = v;
        }
        config
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn with_blob_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.blob_dir = dir.into();
        self
    }

    pub fn with_llm_api_key(mut self, key: impl Into<String>) -> Self {
        self.llm_api_key = key.into();
        self
    }

    pub fn with_http_timeout(mut self, secs: u64) -> Self {
        self.http_timeout_secs = secs;
        self
    }

    pub fn with_budgets(mut self, max_iterations: u32, max_tool_calls: u32) -> Self {
        self.max_iterations = max_iterations;
        self.max_tool_calls = max_tool_calls;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_db_path("/tmp/posture.db")
            .with_llm_api_key("test-key")
            .with_budgets(5, 20);

        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/posture.db")));
        assert_eq!(config.llm_api_key, "test-key");
        assert_eq!(config.max_iterations, 5);
        assert_eq!(config.max_tool_calls, 20);
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.http_timeout_secs, 10);
        assert_eq!(config.source_ceiling_secs, 30);
        assert_eq!(config.max_investigations, 2);
        assert_eq!(config.evidence_cache_secs, 300);
    }
}
