use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;

const DEFAULT_CORS_ORIGINS: &[&str] = &[
    "http://localhost:3000",
    "http://localhost:5173",
    "http://127.0.0.1:5173",
];

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub projects_dir: PathBuf,
    pub media_dir: PathBuf,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub max_concurrent_renders: usize,
    pub task_retention_days: i64,
    pub cors_origins: Vec<String>,
    pub llm: LlmConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            projects_dir: PathBuf::from("./projects"),
            media_dir: PathBuf::from("./media"),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            max_concurrent_renders: reelpilot_render::queue::DEFAULT_MAX_CONCURRENT,
            task_retention_days: 7,
            cors_origins: DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect(),
            llm: LlmConfig {
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-3.5-turbo".to_string(),
            },
        }
    }
}

impl ServerConfig {
    /// Read `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v.parse().with_context(|| format!("PORT must be a port number, got {v:?}"))?,
            None => defaults.port,
        };
        let max_concurrent_renders = match get("MAX_CONCURRENT_RENDERS") {
            Some(v) => v
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("MAX_CONCURRENT_RENDERS must be a positive integer, got {v:?}"))?,
            None => defaults.max_concurrent_renders,
        };
        let task_retention_days = match get("TASK_RETENTION_DAYS") {
            Some(v) => v
                .parse::<i64>()
                .ok()
                .filter(|n| *n >= 0)
                .with_context(|| format!("TASK_RETENTION_DAYS must be a non-negative integer, got {v:?}"))?,
            None => defaults.task_retention_days,
        };
        let cors_origins = match get("CORS_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.cors_origins,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            projects_dir: get("PROJECTS_DIR").map(PathBuf::from).unwrap_or(defaults.projects_dir),
            media_dir: get("MEDIA_DIR").map(PathBuf::from).unwrap_or(defaults.media_dir),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or(defaults.ffmpeg_path),
            ffprobe_path: get("FFPROBE_PATH").unwrap_or(defaults.ffprobe_path),
            max_concurrent_renders,
            task_retention_days,
            cors_origins,
            llm: LlmConfig {
                api_key: get("LLM_API_KEY").or_else(|| get("OPENAI_API_KEY")),
                base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm.base_url),
                model: get("LLM_MODEL").unwrap_or(defaults.llm.model),
            },
        })
    }

    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    pub fn task_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.task_retention_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.max_concurrent_renders, 2);
        assert_eq!(config.task_retention_days, 7);
        assert_eq!(config.cors_origins.len(), 3);
        assert!(config.llm.api_key.is_none());
        assert_eq!(config.bind_addr().unwrap().to_string(), "127.0.0.1:8000");
    }

    #[test]
    fn env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PORT", "9100"),
            ("PROJECTS_DIR", "/data/projects"),
            ("MAX_CONCURRENT_RENDERS", "4"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CORS_ORIGINS", "http://a.test, http://b.test"),
        ]))
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.projects_dir, PathBuf::from("/data/projects"));
        assert_eq!(config.max_concurrent_renders, 4);
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn llm_api_key_takes_precedence() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("LLM_API_KEY", "primary"),
            ("OPENAI_API_KEY", "secondary"),
        ]))
        .unwrap();
        assert_eq!(config.llm.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn invalid_numbers_are_startup_errors() {
        assert!(ServerConfig::from_lookup(lookup(&[("PORT", "eighty")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("MAX_CONCURRENT_RENDERS", "0")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[("TASK_RETENTION_DAYS", "-1")])).is_err());
    }
}
