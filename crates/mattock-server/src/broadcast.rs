//! The play-phase client handle and the two broadcast indexes.

use mattock_protocol::wire::encode_packet;
use mattock_protocol::{ConnectionState, ConnectionWriter, Packet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::player::Player;

/// The writable half of a play-phase connection. The async mutex is the
/// per-connection send lock: packets hit the wire in send-call order.
pub struct ClientHandle {
    pub uuid: Uuid,
    writer: AsyncMutex<ConnectionWriter>,
    closed: AtomicBool,
    /// Last keep-alive id sent; echoes are matched against it.
    pub keep_alive_id: AtomicI64,
    pub last_keep_alive_ack: Mutex<std::time::Instant>,
}

impl ClientHandle {
    pub fn new(uuid: Uuid, writer: ConnectionWriter) -> Self {
        Self {
            uuid,
            writer: AsyncMutex::new(writer),
            closed: AtomicBool::new(false),
            keep_alive_id: AtomicI64::new(0),
            last_keep_alive_ack: Mutex::new(std::time::Instant::now()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection dead; every later send is a no-op.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Encode and send one play-phase packet under the send lock.
    pub async fn send(&self, packet: &Packet) {
        if self.is_closed() {
            return;
        }
        let encoded = match encode_packet(ConnectionState::Play, packet) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("failed to encode packet: {e}");
                return;
            }
        };
        let mut data = encoded;
        let packet_id = match mattock_protocol::read_varint(&mut data) {
            Ok(id) => id,
            Err(e) => {
                warn!("failed to split packet id: {e}");
                return;
            }
        };
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return;
        }
        if let Err(e) = writer.write_packet(packet_id, &data).await {
            debug!("send to {} failed: {e}", self.uuid);
            self.close();
        }
    }
}

/// The global connected-client index.
#[derive(Default)]
pub struct Clients {
    map: Mutex<HashMap<Uuid, Arc<ClientHandle>>>,
}

impl Clients {
    pub fn insert(&self, handle: Arc<ClientHandle>) {
        self.map.lock().unwrap().insert(handle.uuid, handle);
    }

    pub fn remove(&self, uuid: &Uuid) -> Option<Arc<ClientHandle>> {
        self.map.lock().unwrap().remove(uuid)
    }

    pub fn get(&self, uuid: &Uuid) -> Option<Arc<ClientHandle>> {
        self.map.lock().unwrap().get(uuid).cloned()
    }

    pub fn count(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    fn snapshot(&self) -> Vec<Arc<ClientHandle>> {
        self.map.lock().unwrap().values().cloned().collect()
    }

    /// Send to every connected client, optionally excluding one. The list
    /// is snapshotted under the lock; sends happen outside it.
    pub async fn broadcast(&self, packet: &Packet, exclude: Option<Uuid>) {
        let targets = self.snapshot();
        for client in targets {
            if Some(client.uuid) == exclude {
                continue;
            }
            client.send(packet).await;
        }
    }
}

/// Per-chunk viewer lists.
#[derive(Default)]
pub struct ChunkViewers {
    map: Mutex<HashMap<(i32, i32), Vec<Arc<Player>>>>,
}

impl ChunkViewers {
    /// Add a viewer; the chunk's entry is created on first viewer.
    pub fn add(&self, coord: (i32, i32), player: Arc<Player>) {
        let mut map = self.map.lock().unwrap();
        let viewers = map.entry(coord).or_default();
        if !viewers.iter().any(|p| p.uuid == player.uuid) {
            viewers.push(player);
        }
    }

    /// Remove a viewer; the entry is dropped when no viewers remain.
    pub fn remove(&self, coord: (i32, i32), uuid: &Uuid) {
        let mut map = self.map.lock().unwrap();
        if let Some(viewers) = map.get_mut(&coord) {
            viewers.retain(|p| &p.uuid != uuid);
            if viewers.is_empty() {
                map.remove(&coord);
            }
        }
    }

    /// Drop a player from every chunk they were viewing.
    pub fn remove_everywhere(&self, uuid: &Uuid) {
        let mut map = self.map.lock().unwrap();
        map.retain(|_, viewers| {
            viewers.retain(|p| &p.uuid != uuid);
            !viewers.is_empty()
        });
    }

    pub fn is_viewer(&self, coord: (i32, i32), uuid: &Uuid) -> bool {
        self.map
            .lock()
            .unwrap()
            .get(&coord)
            .map(|viewers| viewers.iter().any(|p| &p.uuid == uuid))
            .unwrap_or(false)
    }

    pub fn viewer_count(&self, coord: (i32, i32)) -> usize {
        self.map.lock().unwrap().get(&coord).map(Vec::len).unwrap_or(0)
    }

    pub fn has_entry(&self, coord: (i32, i32)) -> bool {
        self.map.lock().unwrap().contains_key(&coord)
    }

    fn snapshot(&self, coord: (i32, i32)) -> Vec<Arc<Player>> {
        self.map.lock().unwrap().get(&coord).cloned().unwrap_or_default()
    }

    /// Send to every viewer of a chunk. Snapshot first, then send without
    /// holding the viewers lock (the send lock is taken per connection).
    pub async fn chunk_broadcast(&self, coord: (i32, i32), packet: &Packet) {
        let viewers = self.snapshot(coord);
        for player in viewers {
            player.client.send(packet).await;
        }
    }
}
