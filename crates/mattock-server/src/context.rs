//! The server-wide context threaded through every component. Its lifetime
//! is the server's; all shared collections live here rather than in
//! ambient globals.

use crate::auth::AuthClient;
use crate::broadcast::{ChunkViewers, Clients};
use crate::config::ServerConfig;
use crate::entity::EntityManager;
use crate::player::Player;
use crate::tick::{Weather, WorldBorder, WorldTime};
use crate::worker::WorkerPool;
use anyhow::Context as _;
use base64::Engine as _;
use mattock_command::CommandGraph;
use mattock_protocol::crypto::ServerKeyPair;
use mattock_protocol::wire::{GAME_VERSION, PROTOCOL_VERSION};
use mattock_protocol::Packet;
use mattock_inventory::RecipeSet;
use mattock_registry::RegistryManager;
use mattock_world::{flat_world_presets, ChunkRepository};
use mattock_types::Vec3d;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use tracing::info;
use uuid::Uuid;

pub struct ServerContext {
    pub config: ServerConfig,
    pub keypair: ServerKeyPair,
    pub server_id: String,
    pub registries: RegistryManager,
    pub chunks: ChunkRepository,
    pub clients: Arc<Clients>,
    pub viewers: Arc<ChunkViewers>,
    pub players: Mutex<HashMap<Uuid, Arc<Player>>>,
    pub players_by_name: Mutex<HashMap<String, Arc<Player>>>,
    pub entities: EntityManager,
    pub time: Mutex<WorldTime>,
    pub weather: Mutex<Weather>,
    pub border: Mutex<WorldBorder>,
    pub recipes: RecipeSet,
    pub pool: WorkerPool,
    pub auth: AuthClient,
    /// Built once at startup; handlers receive this context.
    pub commands: OnceLock<CommandGraph<ServerContext>>,
    /// The serialized command graph body, shared by every join.
    pub commands_wire: OnceLock<Vec<u8>>,
    /// The world spawn point, from level.dat.
    pub spawn: Vec3d,
    teleport_ids: AtomicI32,
    favicon: Option<String>,
}

impl ServerContext {
    pub fn new(config: ServerConfig, spawn: Vec3d) -> anyhow::Result<Arc<Self>> {
        let keypair = ServerKeyPair::generate().context("RSA keypair generation")?;
        let registries = RegistryManager::load(Path::new(&config.registry_file))?;

        let presets = flat_world_presets();
        let settings = presets
            .get(&config.flat_world_preset)
            .cloned()
            .unwrap_or_else(|| {
                info!(
                    "unknown flat preset {}, falling back to classic_flat",
                    config.flat_world_preset
                );
                presets["classic_flat"].clone()
            });
        let region_dir = Path::new(&config.world_dir).join("region");
        let chunks = ChunkRepository::new(region_dir, settings, registries.biome_ids())?;

        let favicon = config.favicon.as_ref().and_then(|path| {
            match std::fs::read(path) {
                Ok(bytes) => Some(format!(
                    "data:image/png;base64,{}",
                    base64::engine::general_purpose::STANDARD.encode(bytes)
                )),
                Err(e) => {
                    tracing::warn!("could not read favicon {path}: {e}");
                    None
                }
            }
        });

        let border = WorldBorder::from_config(&config.world_border);
        let pool_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Ok(Arc::new(Self {
            keypair,
            server_id: String::new(), // modern servers send an empty server id
            registries,
            chunks,
            clients: Arc::new(Clients::default()),
            viewers: Arc::new(ChunkViewers::default()),
            players: Mutex::new(HashMap::new()),
            players_by_name: Mutex::new(HashMap::new()),
            entities: EntityManager::new(),
            time: Mutex::new(WorldTime::default()),
            weather: Mutex::new(Weather::default()),
            border: Mutex::new(border),
            recipes: RecipeSet::new(),
            pool: WorkerPool::new(pool_workers, 256),
            auth: AuthClient::new(&config.auth),
            commands: OnceLock::new(),
            commands_wire: OnceLock::new(),
            spawn,
            teleport_ids: AtomicI32::new(1),
            favicon,
            config,
        }))
    }

    /// Allocate a fresh teleport id for a synchronize-player-position.
    pub fn next_teleport_id(&self) -> i32 {
        self.teleport_ids.fetch_add(1, Ordering::Relaxed)
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().unwrap().len()
    }

    pub fn add_player(&self, player: Arc<Player>) {
        self.players.lock().unwrap().insert(player.uuid, player.clone());
        self.players_by_name
            .lock()
            .unwrap()
            .insert(player.name.clone(), player);
    }

    pub fn remove_player(&self, uuid: &Uuid) -> Option<Arc<Player>> {
        let player = self.players.lock().unwrap().remove(uuid)?;
        self.players_by_name.lock().unwrap().remove(&player.name);
        Some(player)
    }

    pub fn get_player(&self, uuid: &Uuid) -> Option<Arc<Player>> {
        self.players.lock().unwrap().get(uuid).cloned()
    }

    pub fn get_player_by_name(&self, name: &str) -> Option<Arc<Player>> {
        self.players_by_name.lock().unwrap().get(name).cloned()
    }

    pub fn all_players(&self) -> Vec<Arc<Player>> {
        self.players.lock().unwrap().values().cloned().collect()
    }

    /// Fire-and-forget broadcast, usable from sync code such as command
    /// handlers.
    pub fn queue_broadcast(&self, packet: Packet) {
        let clients = self.clients.clone();
        tokio::spawn(async move {
            clients.broadcast(&packet, None).await;
        });
    }

    /// Fire-and-forget single send.
    pub fn queue_send(&self, player: &Arc<Player>, packet: Packet) {
        let client = player.client.clone();
        tokio::spawn(async move {
            client.send(&packet).await;
        });
    }

    /// The status-response JSON document.
    pub fn status_json(&self) -> String {
        let mut body = serde_json::json!({
            "version": { "name": GAME_VERSION, "protocol": PROTOCOL_VERSION },
            "players": { "max": self.config.max_players, "online": self.player_count() },
            "description": { "text": self.config.motd },
        });
        if let Some(ref favicon) = self.favicon {
            body["favicon"] = serde_json::Value::String(favicon.clone());
        }
        body.to_string()
    }

    /// Effective per-player view distance: the smaller of the client's
    /// request and the server limit.
    pub fn effective_view_distance(&self, requested: i32) -> i32 {
        requested.clamp(2, self.config.view_distance as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_context() -> Arc<ServerContext> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.world_dir = dir.path().join("world").to_string_lossy().into_owned();
        // Leak the tempdir so the region directory outlives the test.
        std::mem::forget(dir);
        ServerContext::new(config, Vec3d::new(0.5, -59.0, 0.5)).unwrap()
    }

    #[tokio::test]
    async fn test_status_json_shape() {
        let ctx = test_context();
        let json: serde_json::Value = serde_json::from_str(&ctx.status_json()).unwrap();
        assert_eq!(json["version"]["protocol"], 768);
        assert_eq!(json["players"]["online"], 0);
        assert_eq!(json["players"]["max"], 20);
        assert!(json.get("favicon").is_none());
    }

    #[tokio::test]
    async fn test_effective_view_distance_clamps() {
        let ctx = test_context();
        assert_eq!(ctx.effective_view_distance(32), 8);
        assert_eq!(ctx.effective_view_distance(5), 5);
        assert_eq!(ctx.effective_view_distance(0), 2);
    }
}
