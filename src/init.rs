use std::error::Error;
use std::sync::Arc;

use crate::agents::{CompletionBackend, OllamaBackend, PanelOrchestrator, RigBackend};
use crate::storage::{AiConfig, AppState, BackendKind, SessionStore};

const DEFAULT_CORS_ORIGINS: [&str; 3] = [
    "http://localhost:5000",
    "https://localhost:5001",
    "http://localhost:8501",
];

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Self {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()?,
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|value| parse_origins(&value))
                .unwrap_or_else(|_| DEFAULT_CORS_ORIGINS.iter().map(|s| s.to_string()).collect()),
        })
    }
}

fn parse_origins(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

pub async fn app_init() -> Result<(Config, Arc<AppState>), Box<dyn Error>> {
    let config = Config::from_env()?;
    log::info!("✅ Configuration loaded");
    let ai_config = AiConfig::from_env()?;
    log::info!("✅ Ai Configuration loaded");

    let backend = setup_backend(&ai_config);
    let orchestrator = Arc::new(PanelOrchestrator::new(
        backend,
        ai_config.models.clone(),
        ai_config.timeout,
    ));

    let state = Arc::new(AppState {
        orchestrator,
        sessions: Arc::new(SessionStore::new()),
        ai_config,
    });
    Ok((config, state))
}

// ============================================================================
// Setup Functions
// ============================================================================

fn setup_backend(ai_config: &AiConfig) -> Option<Arc<dyn CompletionBackend>> {
    let Some(url) = ai_config.url.as_deref() else {
        log::warn!("⚠️  AI_URL is not set, multi-agent requests will fail");
        return None;
    };

    log::info!("🤖 Model backend: {} at {}", ai_config.backend, url);
    match ai_config.backend {
        BackendKind::Ollama => Some(Arc::new(OllamaBackend::new(url))),
        BackendKind::Rig => match RigBackend::new(url) {
            Ok(backend) => Some(Arc::new(backend)),
            Err(e) => {
                log::warn!("⚠️  Rig backend unavailable: {}", e);
                None
            }
        },
    }
}
