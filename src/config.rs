use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Completion service
    pub completion_api_url: String,
    pub completion_api_key: String,
    pub completion_model: String,
    pub completion_max_tokens: u32,
    pub completion_timeout_seconds: u64,
    pub completion_max_retries: u32,
    pub completion_server_retry_seconds: u64,
    pub extraction_cost_alert_usd: Decimal,

    // Document limits
    pub max_upload_bytes: u64,
    pub max_pages: u32,

    // Storage
    pub data_dir: PathBuf,
    pub split_sections: bool,
    pub redis_url: Option<String>,

    // Mapping
    pub review_threshold: f64,

    // Job lifecycle
    pub job_ttl_seconds: u64,
    pub job_sweep_interval_seconds: u64,
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Completion service
        let completion_api_url = env::var("COMPLETION_API_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        url::Url::parse(&completion_api_url)
            .with_context(|| format!("COMPLETION_API_URL is not a valid URL: {}", completion_api_url))?;
        let completion_api_key =
            env::var("COMPLETION_API_KEY").context("COMPLETION_API_KEY must be set")?;
        let completion_model =
            env::var("COMPLETION_MODEL").unwrap_or_else(|_| "claude-sonnet-4-5".to_string());
        let completion_max_tokens = parsed_or("COMPLETION_MAX_TOKENS", 8192);
        let completion_timeout_seconds = parsed_or("COMPLETION_TIMEOUT_SECONDS", 180); // long documents take a while
        let completion_max_retries = parsed_or("COMPLETION_MAX_RETRIES", 3u32).max(1);
        let completion_server_retry_seconds = parsed_or("COMPLETION_SERVER_RETRY_SECONDS", 5);
        let extraction_cost_alert_usd =
            parsed_or("EXTRACTION_COST_ALERT_USD", Decimal::new(100, 2));

        // Document limits
        let max_upload_mb: u64 = parsed_or("MAX_UPLOAD_MB", 50);
        let max_pages = parsed_or("MAX_PAGES", 500);

        // Storage
        let data_dir = PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string()));
        let split_sections = parsed_or("SPLIT_SECTIONS", true);
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty());

        // Mapping
        let review_threshold = parsed_or("REVIEW_THRESHOLD", 0.75f64).clamp(0.0, 1.0);

        // Job lifecycle
        let job_ttl_seconds = parsed_or("JOB_TTL_SECONDS", 86400); // 24 hours
        let job_sweep_interval_seconds = parsed_or("JOB_SWEEP_INTERVAL_SECONDS", 3600);

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            completion_api_url,
            completion_api_key,
            completion_model,
            completion_max_tokens,
            completion_timeout_seconds,
            completion_max_retries,
            completion_server_retry_seconds,
            extraction_cost_alert_usd,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
            max_pages,
            data_dir,
            split_sections,
            redis_url,
            review_threshold,
            job_ttl_seconds,
            job_sweep_interval_seconds,
        })
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    pub fn extraction_dir(&self) -> PathBuf {
        self.data_dir.join("extractions")
    }

    pub fn sections_dir(&self) -> PathBuf {
        self.data_dir.join("sections")
    }

    pub fn debug_dir(&self) -> PathBuf {
        self.data_dir.join("debug")
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_seconds)
    }

    pub fn job_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.job_sweep_interval_seconds.max(1))
    }
}

#[cfg(test)]
impl Settings {
    /// Settings rooted in a scratch directory, with no external services.
    pub fn for_tests(data_dir: &std::path::Path) -> Self {
        Settings {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            completion_api_url: "http://localhost:9".to_string(),
            completion_api_key: "test-key".to_string(),
            completion_model: "test-model".to_string(),
            completion_max_tokens: 1024,
            completion_timeout_seconds: 5,
            completion_max_retries: 3,
            completion_server_retry_seconds: 1,
            extraction_cost_alert_usd: Decimal::ONE,
            max_upload_bytes: 1024 * 1024,
            max_pages: 50,
            data_dir: data_dir.to_path_buf(),
            split_sections: false,
            redis_url: None,
            review_threshold: 0.75,
            job_ttl_seconds: 60,
            job_sweep_interval_seconds: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_defaults_to_dev() {
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything-else"), Environment::Dev);
    }

    #[test]
    fn data_subdirectories_hang_off_data_dir() {
        let settings = Settings::for_tests(std::path::Path::new("/tmp/rfp"));
        assert_eq!(settings.extraction_dir(), PathBuf::from("/tmp/rfp/extractions"));
        assert_eq!(settings.debug_dir(), PathBuf::from("/tmp/rfp/debug"));
    }
}
