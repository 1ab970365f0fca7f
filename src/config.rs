use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
}

/// Immutable run configuration. Built once (file + CLI overrides) and
/// handed to the scheduler; nothing reads ambient state after that.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub project_root: PathBuf,
    pub parallelism: usize,
    pub run_ceiling_secs: u64,
    pub cancel_grace_secs: u64,
    pub layout: LayoutConfig,
    pub compile: CompileConfig,
    pub registry: RegistryConfig,
    pub generator: GeneratorConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub classes_dir: PathBuf,
    pub source_dir: PathBuf,
    pub test_dir: PathBuf,
    pub test_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Compiler command prefix; `-cp`, `-d` and the source file are appended.
    pub compiler: Vec<String>,
    pub max_attempts: u32,
    pub timeout_secs: u64,
    pub cache_dir: PathBuf,
    pub base_archives: Vec<PathBuf>,
    /// Parent for scratch directories; the system temp dir when unset.
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub search_url: String,
    pub download_base: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub enabled: bool,
    pub jar: PathBuf,
    pub java: String,
    pub build_tool: String,
    pub search_budget_secs: u64,
    pub timeout_secs: u64,
    pub classpath_timeout_secs: u64,
    pub require_inspiration: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Groq,
    OpenAi,
    Gemini,
}

impl Provider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "groq" => Some(Self::Groq),
            "openai" => Some(Self::OpenAi),
            "gemini" => Some(Self::Gemini),
            _ => None,
        }
    }

    pub fn default_key_env(self) -> &'static str {
        match self {
            Self::Groq => "GROQ_API_KEY",
            Self::OpenAi => "OPENAI_API_KEY",
            Self::Gemini => "GEMINI_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Groq => "meta-llama/llama-4-scout-17b-16e-instruct",
            Self::OpenAi => "gpt-4.1",
            Self::Gemini => "gemini-2.5-pro",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key_env: Option<String>,
    pub request_spacing_ms: u64,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            parallelism: 4,
            run_ceiling_secs: 2 * 60 * 60,
            cancel_grace_secs: 5,
            layout: LayoutConfig::default(),
            compile: CompileConfig::default(),
            registry: RegistryConfig::default(),
            generator: GeneratorConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            classes_dir: PathBuf::from("target/classes"),
            source_dir: PathBuf::from("src/main/java"),
            test_dir: PathBuf::from("src/test/java"),
            test_suffix: "Test".into(),
        }
    }
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            compiler: vec!["javac".into()],
            max_attempts: 5,
            timeout_secs: 30,
            cache_dir: PathBuf::from(".m2_local_cache"),
            base_archives: [
                "junit-jupiter-api-5.10.2.jar",
                "junit-jupiter-engine-5.10.2.jar",
                "opentest4j-1.3.0.jar",
                "junit-platform-commons-1.10.2.jar",
            ]
            .into_iter()
            .map(PathBuf::from)
            .collect(),
            scratch_dir: None,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            search_url: "https://search.maven.org/solrsearch/select".into(),
            download_base: "https://repo1.maven.org/maven2".into(),
            timeout_secs: 60,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            jar: PathBuf::from("evosuite-master.jar"),
            java: "java".into(),
            build_tool: "mvn".into(),
            search_budget_secs: 60,
            timeout_secs: 5 * 60,
            classpath_timeout_secs: 2 * 60,
            require_inspiration: false,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Groq,
            model: None,
            base_url: None,
            api_key_env: None,
            request_spacing_ms: 2100,
            timeout_secs: 120,
        }
    }
}

impl Config {
    /// Loads `path`, or the default location when `None`. A missing file
    /// at the default location yields defaults; an explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };

        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        Self::from_toml(&raw).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism == 0 {
            return Err(ConfigError::Invalid("parallelism must be at least 1".into()));
        }
        if self.compile.max_attempts == 0 {
            return Err(ConfigError::Invalid("compile.max_attempts must be at least 1".into()));
        }
        if self.compile.compiler.first().map_or(true, |c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid("compile.compiler must name a program".into()));
        }
        Ok(())
    }

    pub fn run_ceiling(&self) -> Duration {
        Duration::from_secs(self.run_ceiling_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

impl CompileConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LlmConfig {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn key_env(&self) -> String {
        self.api_key_env
            .clone()
            .unwrap_or_else(|| self.provider.default_key_env().to_string())
    }

    pub fn api_key(&self) -> Result<String, ConfigError> {
        let name = self.key_env();
        std::env::var(&name)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey(name))
    }
}

pub fn default_config_path() -> PathBuf {
    let mut dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    dir.push("evogen");
    dir.push("config.toml");
    dir
}
