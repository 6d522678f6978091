use futures::future::join_all;
use thiserror::Error;

use crate::context::AppContext;

mod api;
mod bot;
mod cache;
mod config;
mod context;
mod db;
mod engine;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Config(#[from] config::ConfigErr),

    #[error(transparent)]
    App(#[from] context::AppErr),

    #[error(transparent)]
    Transport(#[from] bot::telegram::TransportErr),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    util::trace::init();
    tracing::info!("starting tallybot");

    let config = config::Config::from_env()?;
    let ctx = AppContext::build(config).await?;

    let mut handles = Vec::new();

    handles.push(api::server::start_server(ctx.clone()).await?);
    handles.extend(bot::start(ctx.clone()).await?);
    handles.push(db::retention::spawn_sweeper(
        ctx.activation.clone(),
        ctx.scores.clone(),
    ));

    _ = join_all(handles).await;
    Ok(())
}
