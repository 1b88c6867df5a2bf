use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use index::RetryPolicy;
use query::{ActivationMode, RefinementConfig, RetrievalSettings};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub mode: OperationMode,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub services: ServicesConfig,
    pub retrieval: RetrievalSettings,
    pub refinement: RefinementConfig,
    pub streaming: StreamingConfig,
    pub benchmark: BenchmarkConfig,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub corpus: CorpusConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    Fast,     // shallow graph walks, retrieval only when clearly needed
    Accurate, // always retrieve, wider graph walks
    Balanced,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    pub llm_url: String,
    pub generation_model: String,
    pub embedding_url: String,
    pub search_url: String,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reranker_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Events buffered between generation and the HTTP response.
    pub channel_capacity: usize,
    pub keep_alive_secs: u64,
    /// Server-side ceiling on a single answer.
    pub max_duration_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub history_path: PathBuf,
    pub models: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_set: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.initial_backoff_ms, self.max_backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Applies until response headers are sent; streamed bodies are not cut.
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorpusConfig {
    /// Availability before the first `PUT /corpus`.
    pub initially_available: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperationMode::Balanced,
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
            services: ServicesConfig {
                llm_url: "http://localhost:11434".to_string(),
                generation_model: "llama3".to_string(),
                embedding_url: "http://localhost:11434".to_string(),
                search_url: "http://localhost:8000".to_string(),
                neo4j_uri: "bolt://localhost:7687".to_string(),
                neo4j_user: "neo4j".to_string(),
                neo4j_password: "password".to_string(),
                reranker_url: None,
            },
            retrieval: RetrievalSettings::default(),
            refinement: RefinementConfig::default(),
            streaming: StreamingConfig {
                channel_capacity: 64,
                keep_alive_secs: 15,
                max_duration_secs: 300,
            },
            benchmark: BenchmarkConfig {
                history_path: PathBuf::from("data/benchmark_history.jsonl"),
                models: eval::default_models(),
                query_set: None,
            },
            retry: RetryConfig {
                max_retries: 2,
                initial_backoff_ms: 200,
                max_backoff_ms: 2000,
            },
            concurrency: ConcurrencyConfig {
                request_timeout_secs: 60,
            },
            corpus: CorpusConfig {
                initially_available: false,
            },
        }
    }
}

impl AppConfig {
    pub fn fast_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Fast,
            retrieval: RetrievalSettings {
                mode: ActivationMode::Automatic,
                limit: 5,
                ..base.retrieval.clone()
            },
            refinement: RefinementConfig {
                max_depth: 1,
                max_nodes: 25,
                ..base.refinement.clone()
            },
            retry: RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 100,
                max_backoff_ms: 1000,
            },
            concurrency: ConcurrencyConfig {
                request_timeout_secs: 30,
            },
            ..base
        }
    }

    pub fn accurate_mode() -> Self {
        let base = Self::default();
        Self {
            mode: OperationMode::Accurate,
            retrieval: RetrievalSettings {
                mode: ActivationMode::Always,
                limit: 20,
                ..base.retrieval.clone()
            },
            refinement: RefinementConfig {
                max_depth: 3,
                max_nodes: 100,
                ..base.refinement.clone()
            },
            retry: RetryConfig {
                max_retries: 4,
                initial_backoff_ms: 500,
                max_backoff_ms: 8000,
            },
            concurrency: ConcurrencyConfig {
                request_timeout_secs: 120,
            },
            ..base
        }
    }

    pub fn preset(mode: OperationMode) -> Self {
        match mode {
            OperationMode::Fast => Self::fast_mode(),
            OperationMode::Accurate => Self::accurate_mode(),
            OperationMode::Balanced => Self::default(),
        }
    }

    /// Preset chosen by `RAG__MODE`, then `config/default`, `config/local`
    /// and `RAG__*` environment variables on top.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mode = match std::env::var("RAG__MODE").map(|m| m.to_lowercase()).as_deref() {
            Ok("fast") => OperationMode::Fast,
            Ok("accurate") => OperationMode::Accurate,
            _ => OperationMode::Balanced,
        };

        Self::layered(&Self::preset(mode))?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(
                Environment::with_prefix("RAG")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("benchmark.models")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    fn layered(base: &AppConfig) -> Result<ConfigBuilder<DefaultState>, config::ConfigError> {
        Ok(Config::builder().add_source(Config::try_from(base)?))
    }
}
