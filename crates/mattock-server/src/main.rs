mod auth;
mod broadcast;
mod commands;
mod config;
mod context;
mod entity;
mod player;
mod session;
mod tick;
mod view;
mod worker;

use config::ServerConfig;
use context::ServerContext;
use mattock_region::{LevelData, SessionLock};
use mattock_types::Vec3d;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting mattock server...");

    let config = ServerConfig::load(Path::new("config/server.toml"))?;
    info!(
        "config loaded: bind={}:{}, max_players={}, online_mode={}",
        config.bind, config.port, config.max_players, config.online_mode
    );

    let world_dir = Path::new(&config.world_dir).to_path_buf();
    let _session_lock = SessionLock::acquire(&world_dir)?;
    let level = LevelData::load_or_create(&world_dir)?;
    let spawn = Vec3d::new(
        level.spawn_x as f64 + 0.5,
        level.spawn_y as f64 + 1.0,
        level.spawn_z as f64 + 0.5,
    );
    info!("world '{}' loaded, spawn at {:?}", level.level_name, spawn);

    let ctx = ServerContext::new(config, spawn)?;

    // Build the command graph once; the wire form is shared by every join.
    let graph = commands::build_commands();
    let wire = mattock_command::wire::serialize(&graph);
    ctx.commands
        .set(graph)
        .map_err(|_| anyhow::anyhow!("command graph already set"))?;
    ctx.commands_wire
        .set(wire)
        .map_err(|_| anyhow::anyhow!("command graph already serialized"))?;

    let addr = format!("{}:{}", ctx.config.bind, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("listening on {addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ctrlc_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
        let _ = ctrlc_tx.send(true);
    });

    tokio::select! {
        _ = tick::run_tick_loop(ctx.clone(), shutdown_rx) => {
            info!("server shut down cleanly");
        }
        _ = accept_loop(listener, ctx.clone()) => {
            error!("accept loop exited unexpectedly");
        }
    }

    ctx.pool.shutdown();
    Ok(())
}

async fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("new connection from {peer}");
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    session::handle_connection(ctx, socket).await;
                });
            }
            Err(e) => {
                error!("failed to accept connection: {e}");
            }
        }
    }
}
