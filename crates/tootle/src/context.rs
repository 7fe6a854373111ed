//! Process-wide state shared by every connection.

use anyhow::{Context, Result};
use miditok::{Generator, HeuristicModel, MidiTokenizer, SamplingGenerator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tootleconf::TootleConfig;

/// Immutable after startup; handed to each connection as an `Arc`.
pub struct ServiceContext {
    config: TootleConfig,
    generator: Arc<dyn Generator>,
    started: Instant,
    active_sessions: AtomicUsize,
    shutdown: CancellationToken,
}

impl ServiceContext {
    pub fn new(config: TootleConfig, generator: Arc<dyn Generator>) -> Self {
        Self {
            config,
            generator,
            started: Instant::now(),
            active_sessions: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load the tokenizer named by the model config and pair it with the
    /// built-in heuristic model.
    pub fn from_config(config: TootleConfig) -> Result<Self> {
        let tokenizer = load_tokenizer(&config)?;
        tracing::info!(
            version = %tokenizer.version(),
            vocab_size = tokenizer.vocab_size(),
            device = %config.model.device,
            "tokenizer loaded"
        );
        let generator = SamplingGenerator::new(tokenizer, HeuristicModel::default());
        Ok(Self::new(config, Arc::new(generator)))
    }

    pub fn config(&self) -> &TootleConfig {
        &self.config
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        self.generator.clone()
    }

    pub fn tokenizer(&self) -> &MidiTokenizer {
        self.generator.tokenizer()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Count a connection for as long as the guard lives.
    pub fn session_guard(self: &Arc<Self>) -> SessionGuard {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
        SessionGuard {
            context: Arc::clone(self),
        }
    }

    /// Root token; every connection token is a child of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

pub struct SessionGuard {
    context: Arc<ServiceContext>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.context.active_sessions.fetch_sub(1, Ordering::Relaxed);
    }
}

fn load_tokenizer(config: &TootleConfig) -> Result<MidiTokenizer> {
    let path = &config.model.config;
    if !path.exists() {
        tracing::warn!(
            path = %path.display(),
            no_download = config.model.no_download,
            "model config not found, using the default v2 tokenizer"
        );
        return Ok(MidiTokenizer::default());
    }
    MidiTokenizer::from_config_file(path)
        .with_context(|| format!("Failed to load tokenizer from {}", path.display()))
}
