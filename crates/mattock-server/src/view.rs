//! Per-player chunk subscriptions: diffing on movement, viewer-set
//! maintenance, and chunk delivery through the worker pool.

use crate::context::ServerContext;
use crate::player::Player;
use mattock_protocol::Packet;
use mattock_types::{ChunkPos, Rotation, Vec3d};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Above this per-axis delta, relative entity moves cannot represent the
/// motion and a teleport is sent instead.
pub const RELATIVE_MOVE_LIMIT: f64 = 7.999755859375;

/// Square of chunk coordinates within `view` of the center.
pub fn chunks_in_view(center: ChunkPos, view: i32) -> HashSet<(i32, i32)> {
    let mut chunks = HashSet::with_capacity(((2 * view + 1) * (2 * view + 1)) as usize);
    for dx in -view..=view {
        for dz in -view..=view {
            chunks.insert((center.x + dx, center.z + dz));
        }
    }
    chunks
}

/// Compute the view diff for a move from `old` to `new`.
pub fn view_diff(
    old: Option<ChunkPos>,
    new: ChunkPos,
    view: i32,
) -> (HashSet<(i32, i32)>, HashSet<(i32, i32)>) {
    let old_set = old.map(|c| chunks_in_view(c, view)).unwrap_or_default();
    let new_set = chunks_in_view(new, view);
    let to_remove = old_set.difference(&new_set).copied().collect();
    let to_add = new_set.difference(&old_set).copied().collect();
    (to_remove, to_add)
}

/// Initial-join subscription: record the viewer set without sending any
/// chunk data (delivery runs as its own task).
pub fn subscribe_initial(ctx: &Arc<ServerContext>, player: &Arc<Player>, center: ChunkPos) {
    let view = ctx.effective_view_distance(player.view_distance());
    let (_, to_add) = view_diff(None, center, view);
    let mut viewed = player.viewed_chunks.lock().unwrap();
    for coord in to_add {
        ctx.viewers.add(coord, player.clone());
        viewed.insert(coord);
    }
}

/// Re-subscribe a player after crossing a chunk border. Resident chunks
/// send synchronously; absent ones load on the worker pool and send when
/// their future resolves.
pub async fn update_player_chunk_view(
    ctx: &Arc<ServerContext>,
    player: &Arc<Player>,
    old: Option<ChunkPos>,
    new: ChunkPos,
) {
    let view = ctx.effective_view_distance(player.view_distance());
    let (to_remove, to_add) = view_diff(old, new, view);

    {
        let mut viewed = player.viewed_chunks.lock().unwrap();
        for coord in &to_remove {
            ctx.viewers.remove(*coord, &player.uuid);
            viewed.remove(coord);
        }
        for coord in &to_add {
            ctx.viewers.add(*coord, player.clone());
            viewed.insert(*coord);
        }
    }

    player
        .client
        .send(&Packet::SetCenterChunk {
            chunk_x: new.x,
            chunk_z: new.z,
        })
        .await;

    for coord in &to_remove {
        player
            .client
            .send(&Packet::UnloadChunk {
                chunk_x: coord.0,
                chunk_z: coord.1,
            })
            .await;
    }

    let mut deferred = Vec::new();
    for coord in to_add {
        match ctx.chunks.get_resident(coord.0, coord.1) {
            Some(chunk) => player.client.send(&chunk.to_packet()).await,
            None => deferred.push(coord),
        }
    }
    for coord in deferred {
        dispatch_chunk_send(ctx, player, coord).await;
    }
}

/// Queue a load-and-send on the worker pool.
async fn dispatch_chunk_send(ctx: &Arc<ServerContext>, player: &Arc<Player>, coord: (i32, i32)) {
    let ctx_for_job = ctx.clone();
    let player_for_job = player.clone();
    let submit = ctx
        .pool
        .submit(async move {
            match ctx_for_job.chunks.get_or_load(coord.0, coord.1).await {
                Ok(chunk) => player_for_job.client.send(&chunk.to_packet()).await,
                Err(e) => warn!("chunk ({}, {}) unavailable: {e}", coord.0, coord.1),
            }
        })
        .await;
    if let Err(e) = submit {
        // Shutdown raced the subscription; treated like an unavailable chunk.
        debug!("chunk send for ({}, {}) not queued: {e}", coord.0, coord.1);
    }
}

/// Initial join delivery: a chunk batch with already-resident chunks
/// first, then the worker pool fills in the rest as loads resolve.
pub async fn send_initial_chunks(ctx: &Arc<ServerContext>, player: &Arc<Player>) {
    let center = *player.current_chunk.lock().unwrap();
    let view = ctx.effective_view_distance(player.view_distance());

    player.client.send(&Packet::ChunkBatchStart).await;

    let mut batch_size = 0i32;
    let mut to_load = Vec::new();
    for coord in chunks_in_view(center, view) {
        match ctx.chunks.get_resident(coord.0, coord.1) {
            Some(chunk) => {
                player.client.send(&chunk.to_packet()).await;
                batch_size += 1;
            }
            None => to_load.push(coord),
        }
    }

    // Wave two: loads queued on the pool, sent as their futures resolve.
    let mut pending = Vec::new();
    for coord in &to_load {
        let ctx_for_job = ctx.clone();
        let coord = *coord;
        match ctx
            .pool
            .submit(async move { ctx_for_job.chunks.get_or_load(coord.0, coord.1).await.ok() })
            .await
        {
            Ok(rx) => pending.push(rx),
            Err(e) => debug!("initial chunk load not queued: {e}"),
        }
    }
    for rx in pending {
        if let Ok(Some(chunk)) = rx.await {
            player.client.send(&chunk.to_packet()).await;
            batch_size += 1;
        }
    }

    player
        .client
        .send(&Packet::ChunkBatchFinished { batch_size })
        .await;
}

fn angle_to_byte(degrees: f32) -> u8 {
    ((degrees / 360.0) * 256.0) as i32 as u8
}

/// Tell everyone else how this player moved: relative moves below the
/// limit, an absolute teleport otherwise, and the head rotation either
/// way.
pub async fn broadcast_movement(
    ctx: &Arc<ServerContext>,
    player: &Arc<Player>,
    old_pos: Vec3d,
    new_pos: Vec3d,
    rotation: Rotation,
    on_ground: bool,
) {
    let delta_x = new_pos.x - old_pos.x;
    let delta_y = new_pos.y - old_pos.y;
    let delta_z = new_pos.z - old_pos.z;

    let packet = if delta_x.abs() < RELATIVE_MOVE_LIMIT
        && delta_y.abs() < RELATIVE_MOVE_LIMIT
        && delta_z.abs() < RELATIVE_MOVE_LIMIT
    {
        Packet::UpdateEntityPositionAndRotation {
            entity_id: player.entity_id,
            delta_x: (delta_x * 4096.0) as i16,
            delta_y: (delta_y * 4096.0) as i16,
            delta_z: (delta_z * 4096.0) as i16,
            yaw: angle_to_byte(rotation.yaw),
            pitch: angle_to_byte(rotation.pitch),
            on_ground,
        }
    } else {
        Packet::TeleportEntity {
            entity_id: player.entity_id,
            x: new_pos.x,
            y: new_pos.y,
            z: new_pos.z,
            velocity: Vec3d::new(0.0, 0.0, 0.0),
            yaw: rotation.yaw,
            pitch: rotation.pitch,
            on_ground,
        }
    };
    ctx.clients.broadcast(&packet, Some(player.uuid)).await;

    let head = Packet::SetHeadRotation {
        entity_id: player.entity_id,
        head_yaw: angle_to_byte(rotation.yaw),
    };
    ctx.clients.broadcast(&head, Some(player.uuid)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunks_in_view_count() {
        let set = chunks_in_view(ChunkPos::new(0, 0), 2);
        assert_eq!(set.len(), 25);
        assert!(set.contains(&(2, 2)));
        assert!(!set.contains(&(3, 0)));
    }

    #[test]
    fn test_view_diff_scenario() {
        // Player at (0,0) with view 2 moves to (1,0).
        let (to_remove, to_add) = view_diff(Some(ChunkPos::new(0, 0)), ChunkPos::new(1, 0), 2);
        let expected_remove: HashSet<_> =
            [(-2, -2), (-2, -1), (-2, 0), (-2, 1), (-2, 2)].into_iter().collect();
        let expected_add: HashSet<_> =
            [(3, -2), (3, -1), (3, 0), (3, 1), (3, 2)].into_iter().collect();
        assert_eq!(to_remove, expected_remove);
        assert_eq!(to_add, expected_add);
    }

    #[test]
    fn test_view_diff_initial_join_adds_everything() {
        let (to_remove, to_add) = view_diff(None, ChunkPos::new(0, 0), 1);
        assert!(to_remove.is_empty());
        assert_eq!(to_add.len(), 9);
    }

    #[test]
    fn test_angle_to_byte() {
        assert_eq!(angle_to_byte(0.0), 0);
        assert_eq!(angle_to_byte(90.0), 64);
        assert_eq!(angle_to_byte(180.0), 128);
        assert_eq!(angle_to_byte(-90.0), 192);
    }

    #[tokio::test]
    async fn test_update_maintains_viewer_sets() {
        use crate::broadcast::ClientHandle;
        use crate::config::ServerConfig;
        use crate::context::ServerContext;
        use crate::player::Player;
        use mattock_protocol::Connection;
        use mattock_types::GameProfile;

        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.world_dir = dir.path().join("world").to_string_lossy().into_owned();
        let ctx = ServerContext::new(config, Vec3d::new(0.5, -59.0, 0.5)).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _peer = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        let (_reader, writer) = Connection::new(server_side).into_split();

        let profile = GameProfile {
            uuid: uuid::Uuid::new_v4(),
            name: "viewer".into(),
            properties: Vec::new(),
        };
        let handle = Arc::new(ClientHandle::new(profile.uuid, writer));
        let player = Arc::new(Player::new(
            1000,
            profile,
            handle,
            Vec3d::new(0.5, -59.0, 0.5),
            2,
        ));
        ctx.add_player(player.clone());

        subscribe_initial(&ctx, &player, ChunkPos::new(0, 0));
        assert!(ctx.viewers.is_viewer((0, 0), &player.uuid));
        assert!(ctx.viewers.is_viewer((-2, 2), &player.uuid));
        assert!(!ctx.viewers.is_viewer((3, 0), &player.uuid));

        update_player_chunk_view(&ctx, &player, Some(ChunkPos::new(0, 0)), ChunkPos::new(1, 0))
            .await;
        // Membership now tracks the new center exactly.
        for dx in -4..=5 {
            for dz in -4i32..=4 {
                let within = (dx - 1i32).abs() <= 2 && dz.abs() <= 2;
                assert_eq!(
                    ctx.viewers.is_viewer((dx, dz), &player.uuid),
                    within,
                    "chunk ({dx}, {dz})"
                );
            }
        }
        // Abandoned chunks with no viewers left drop their map entry.
        assert!(!ctx.viewers.has_entry((-2, 0)));

        // A disconnect clears everything.
        ctx.viewers.remove_everywhere(&player.uuid);
        assert!(!ctx.viewers.has_entry((1, 0)));
    }
}
