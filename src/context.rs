use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::instrument;

use crate::bot::commands::AdminCommands;
use crate::bot::telegram::{Bot, TransportErr};
use crate::config::{Config, ConfigErr};
use crate::db::activation::PgActivationStore;
use crate::db::prelude::{ActivationStore, ScoreStore};
use crate::db::scores::PgScoreStore;
use crate::engine::ScoringEngine;

/// Everything a handler needs, wired once at startup and shared behind an
/// `Arc`. No global state; every component receives its dependencies here.
pub struct AppContext {
    pub config: Config,
    pub pool: PgPool,
    pub activation: Arc<dyn ActivationStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub engine: ScoringEngine,
    pub bot: Bot,
    pub commands: AdminCommands,
}

impl AppContext {
    #[instrument(skip(config))]
    pub async fn build(config: Config) -> AppResult<Arc<Self>> {
        let pool = crate::db::connect(&config.database_url).await?;
        crate::db::ensure_schema(&pool).await?;

        let bot = Bot::new(&config.bot_token)?;
        Ok(Arc::new(Self::assemble(config, pool, bot)))
    }

    /// Wires stores, engine, and command surface around an established pool
    /// and client. The activation and score stores are shared: the engine
    /// and the admin commands must observe the same caches.
    pub fn assemble(config: Config, pool: PgPool, bot: Bot) -> Self {
        let activation: Arc<dyn ActivationStore> = Arc::new(PgActivationStore::new(pool.clone()));
        let scores: Arc<dyn ScoreStore> = Arc::new(PgScoreStore::new(pool.clone()));

        let engine = ScoringEngine::new(activation.clone(), scores.clone(), config.policy);
        let commands = AdminCommands::new(
            config.owner_id,
            activation.clone(),
            scores.clone(),
            Arc::new(bot.clone()),
        );

        Self {
            config,
            pool,
            activation,
            scores,
            engine,
            bot,
            commands,
        }
    }
}

pub type AppResult<T> = core::result::Result<T, AppErr>;

#[derive(Debug, Error)]
pub enum AppErr {
    #[error(transparent)]
    Config(#[from] ConfigErr),

    #[error(transparent)]
    Store(#[from] crate::db::StoreErr),

    #[error(transparent)]
    Transport(#[from] TransportErr),
}
