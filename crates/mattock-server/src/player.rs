//! Per-player state shared between the read loop, the keep-alive task,
//! the view controller and broadcasts.

use crate::broadcast::ClientHandle;
use mattock_inventory::Inventory;
use mattock_types::{ChunkPos, GameMode, GameProfile, Rotation, Vec3d};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// A player's expiring chat session key, from the player-session packet.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: Uuid,
    pub expires_at: i64,
    pub public_key_der: Vec<u8>,
    pub key_signature: Vec<u8>,
}

pub struct Player {
    pub entity_id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub profile: GameProfile,
    pub client: Arc<ClientHandle>,
    pub game_mode: Mutex<GameMode>,
    pub position: Mutex<Vec3d>,
    pub rotation: Mutex<Rotation>,
    pub on_ground: AtomicBool,
    pub current_chunk: Mutex<ChunkPos>,
    /// Chunk coordinates this player is currently subscribed to.
    pub viewed_chunks: Mutex<HashSet<(i32, i32)>>,
    pub view_distance: AtomicI32,
    pub active_slot: AtomicU8,
    pub inventory: Mutex<Inventory>,
    pub chat_session: Mutex<Option<ChatSession>>,
    pub lang: Mutex<String>,
    /// Teleport ids awaiting a client confirm, with issue times for
    /// eviction.
    pub pending_teleports: Mutex<HashMap<i32, Instant>>,
    /// While a teleport is outstanding, movement packets are dropped.
    pub awaiting_teleport: AtomicBool,
}

impl Player {
    pub fn new(
        entity_id: i32,
        profile: GameProfile,
        client: Arc<ClientHandle>,
        spawn: Vec3d,
        view_distance: i32,
    ) -> Self {
        Self {
            entity_id,
            uuid: profile.uuid,
            name: profile.name.clone(),
            profile,
            client,
            game_mode: Mutex::new(GameMode::Creative),
            position: Mutex::new(spawn),
            rotation: Mutex::new(Rotation::default()),
            on_ground: AtomicBool::new(true),
            current_chunk: Mutex::new(spawn.chunk_pos()),
            viewed_chunks: Mutex::new(HashSet::new()),
            view_distance: AtomicI32::new(view_distance),
            active_slot: AtomicU8::new(0),
            inventory: Mutex::new(Inventory::new()),
            chat_session: Mutex::new(None),
            lang: Mutex::new("en_us".to_string()),
            pending_teleports: Mutex::new(HashMap::new()),
            awaiting_teleport: AtomicBool::new(false),
        }
    }

    pub fn position(&self) -> Vec3d {
        *self.position.lock().unwrap()
    }

    pub fn set_position(&self, pos: Vec3d) {
        *self.position.lock().unwrap() = pos;
    }

    pub fn rotation(&self) -> Rotation {
        *self.rotation.lock().unwrap()
    }

    pub fn view_distance(&self) -> i32 {
        self.view_distance.load(Ordering::Relaxed)
    }

    /// Record a fresh teleport id and flip into the awaiting state.
    pub fn begin_teleport(&self, teleport_id: i32) {
        self.pending_teleports
            .lock()
            .unwrap()
            .insert(teleport_id, Instant::now());
        self.awaiting_teleport.store(true, Ordering::Release);
    }

    /// Clear a confirmed teleport id; returns whether it was pending.
    pub fn confirm_teleport(&self, teleport_id: i32) -> bool {
        let mut pending = self.pending_teleports.lock().unwrap();
        let confirmed = pending.remove(&teleport_id).is_some();
        if confirmed && pending.is_empty() {
            self.awaiting_teleport.store(false, Ordering::Release);
        }
        confirmed
    }

    /// Evict teleport ids older than the grace window; returns how many
    /// were dropped.
    pub fn evict_stale_teleports(&self, grace: std::time::Duration) -> usize {
        let mut pending = self.pending_teleports.lock().unwrap();
        let before = pending.len();
        pending.retain(|_, issued| issued.elapsed() < grace);
        if pending.is_empty() {
            self.awaiting_teleport.store(false, Ordering::Release);
        }
        before - pending.len()
    }

    pub fn is_awaiting_teleport(&self) -> bool {
        self.awaiting_teleport.load(Ordering::Acquire)
    }
}
