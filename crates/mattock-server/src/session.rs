//! The per-connection state machine: handshake, status, login,
//! configuration, and the play-phase read loop.

use crate::auth::{offline_uuid, AuthError};
use crate::broadcast::ClientHandle;
use crate::context::ServerContext;
use crate::entity::{Entity, ItemEntity, ENTITY_TYPE_PLAYER};
use crate::player::{ChatSession, Player};
use crate::tick::run_keep_alive;
use crate::view;
use mattock_inventory::{ClickPacket, Slot, SyncAction};
use mattock_protocol::crypto;
use mattock_protocol::wire::{decode_packet, encode_packet, PROTOCOL_VERSION};
use mattock_protocol::{
    player_info_actions, Connection, ConnectionReader, ConnectionState, FrameError, KnownPack,
    Packet, PlayerInfoEntry, ServerLink,
};
use mattock_types::{GameMode, GameProfile, TextComponent, Vec3d};
use mattock_world::block_states;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("packet 0x{0:02X} not valid in the current phase")]
    UnexpectedPacket(i32),
    #[error("invalid handshake next-state {0}")]
    UnexpectedPhase(i32),
    #[error("authentication failed")]
    AuthFailure,
    #[error("authentication service unavailable")]
    AuthUnavailable,
    #[error("encryption setup failed")]
    CryptoFailure,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("{0}")]
    Protocol(String),
}

/// What the configuration phase learned about the client.
struct ClientSettings {
    locale: String,
    view_distance: i8,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            locale: "en_us".into(),
            view_distance: 8,
        }
    }
}

/// Drive one accepted socket through its whole lifecycle.
pub async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    let conn = Connection::new(stream);
    if let Err(e) = handle_connection_inner(&ctx, conn, peer).await {
        debug!("connection {peer} ended: {e}");
    }
}

async fn handle_connection_inner(
    ctx: &Arc<ServerContext>,
    mut conn: Connection,
    peer: std::net::SocketAddr,
) -> Result<(), SessionError> {
    let (id, mut data) = conn.read_packet().await?;
    let packet = decode_packet(ConnectionState::Handshaking, id, &mut data)
        .map_err(|e| SessionError::Protocol(e.to_string()))?;

    let next_state = match packet {
        Packet::Handshake {
            protocol_version,
            next_state,
            ..
        } => {
            debug!("handshake from {peer}: protocol={protocol_version}, next={next_state}");
            if protocol_version != PROTOCOL_VERSION && next_state == 2 {
                warn!("client {peer} speaks protocol {protocol_version}, expected {PROTOCOL_VERSION}");
            }
            next_state
        }
        _ => return Err(SessionError::UnexpectedPacket(id)),
    };

    match ConnectionState::from_handshake_next(next_state) {
        Some(ConnectionState::Status) => handle_status(ctx, &mut conn).await,
        Some(ConnectionState::Login) => {
            let (profile, textures) = handle_login(ctx, &mut conn, peer).await?;
            let settings = handle_configuration(ctx, &mut conn).await?;
            handle_play(ctx, conn, profile, textures, settings).await;
            Ok(())
        }
        _ => Err(SessionError::UnexpectedPhase(next_state)),
    }
}

async fn send_packet(
    conn: &mut Connection,
    state: ConnectionState,
    packet: &Packet,
) -> Result<(), SessionError> {
    let encoded =
        encode_packet(state, packet).map_err(|e| SessionError::Protocol(e.to_string()))?;
    let mut data = encoded;
    let packet_id =
        mattock_protocol::read_varint(&mut data).map_err(|e| SessionError::Protocol(e.to_string()))?;
    conn.write_packet(packet_id, &data).await?;
    Ok(())
}

async fn handle_status(ctx: &Arc<ServerContext>, conn: &mut Connection) -> Result<(), SessionError> {
    loop {
        let (id, mut data) = conn.read_packet().await?;
        let packet = decode_packet(ConnectionState::Status, id, &mut data)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match packet {
            Packet::StatusRequest => {
                let json = ctx.status_json();
                send_packet(conn, ConnectionState::Status, &Packet::StatusResponse { json }).await?;
            }
            Packet::PingRequest { payload } => {
                send_packet(conn, ConnectionState::Status, &Packet::PongResponse { payload })
                    .await?;
                return Ok(());
            }
            _ => return Err(SessionError::UnexpectedPacket(id)),
        }
    }
}

/// Send a login-phase disconnect, then surface the error.
async fn login_reject(
    conn: &mut Connection,
    reason: &str,
    error: SessionError,
) -> Result<(GameProfile, Option<mattock_types::ProfileProperty>), SessionError> {
    let _ = send_packet(
        conn,
        ConnectionState::Login,
        &Packet::Disconnect {
            reason: TextComponent::plain(reason),
        },
    )
    .await;
    Err(error)
}

async fn handle_login(
    ctx: &Arc<ServerContext>,
    conn: &mut Connection,
    peer: std::net::SocketAddr,
) -> Result<(GameProfile, Option<mattock_types::ProfileProperty>), SessionError> {
    let (id, mut data) = conn.read_packet().await?;
    let packet = decode_packet(ConnectionState::Login, id, &mut data)
        .map_err(|e| SessionError::Protocol(e.to_string()))?;
    let (name, client_uuid) = match packet {
        Packet::LoginStart { name, uuid } => (name, uuid),
        _ => return Err(SessionError::UnexpectedPacket(id)),
    };
    info!("login start from {name} ({client_uuid})");

    let mut uuid = client_uuid;
    let mut textures = None;

    if ctx.config.online_mode {
        let verify_token = crypto::generate_verify_token();
        send_packet(
            conn,
            ConnectionState::Login,
            &Packet::EncryptionRequest {
                server_id: ctx.server_id.clone(),
                public_key: ctx.keypair.public_key_der().to_vec(),
                verify_token: verify_token.to_vec(),
                should_authenticate: true,
            },
        )
        .await?;

        let (id, mut data) = conn.read_packet().await?;
        let packet = decode_packet(ConnectionState::Login, id, &mut data)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        let (encrypted_secret, encrypted_token) = match packet {
            Packet::EncryptionResponse {
                shared_secret,
                verify_token,
            } => (shared_secret, verify_token),
            _ => return Err(SessionError::UnexpectedPacket(id)),
        };

        let secret = ctx
            .keypair
            .decrypt(&encrypted_secret)
            .map_err(|_| SessionError::CryptoFailure)?;
        let echoed_token = ctx
            .keypair
            .decrypt(&encrypted_token)
            .map_err(|_| SessionError::CryptoFailure)?;
        if !crypto::verify_token_matches(&verify_token, &echoed_token) {
            return Err(SessionError::CryptoFailure);
        }
        let secret: [u8; 16] = secret
            .as_slice()
            .try_into()
            .map_err(|_| SessionError::CryptoFailure)?;
        conn.enable_encryption(&secret);

        let hash = crypto::server_hash(&ctx.server_id, &secret, ctx.keypair.public_key_der());
        let auth = match ctx.auth.has_joined(&name, &hash, &peer.ip().to_string()).await {
            Ok(result) => result,
            Err(AuthError::Failure) => {
                return login_reject(
                    conn,
                    "Authentication with the session server failed.",
                    SessionError::AuthFailure,
                )
                .await;
            }
            Err(AuthError::Unavailable) => {
                return login_reject(
                    conn,
                    "Authentication servers are unavailable, try again later.",
                    SessionError::AuthUnavailable,
                )
                .await;
            }
        };
        if auth.name != name {
            return login_reject(
                conn,
                "Player name mismatch.",
                SessionError::AuthFailure,
            )
            .await;
        }
        uuid = auth.uuid;
        textures = auth.properties.into_iter().find(|p| p.name == "textures");
        debug!("authenticated {name} as {uuid}");
    } else if uuid.is_nil() {
        uuid = offline_uuid(&name);
    }

    if ctx.config.enable_compression {
        send_packet(
            conn,
            ConnectionState::Login,
            &Packet::SetCompression {
                threshold: ctx.config.compression_threshold,
            },
        )
        .await?;
        conn.enable_compression(ctx.config.compression_threshold);
    }

    // Textures missing (offline mode, or the auth body had none): a
    // profile lookup fills them so other clients render the skin.
    if textures.is_none() {
        textures = ctx.auth.fetch_textures(&uuid).await;
    }

    let mut properties = Vec::new();
    if let Some(ref prop) = textures {
        properties.push(prop.clone());
    }
    let profile = GameProfile {
        uuid,
        name: name.clone(),
        properties,
    };

    send_packet(
        conn,
        ConnectionState::Login,
        &Packet::LoginSuccess {
            profile: profile.clone(),
        },
    )
    .await?;

    let (id, mut data) = conn.read_packet().await?;
    let ack = decode_packet(ConnectionState::Login, id, &mut data)
        .map_err(|e| SessionError::Protocol(e.to_string()))?;
    match ack {
        Packet::LoginAcknowledged => debug!("login acknowledged by {name}"),
        _ => return Err(SessionError::UnexpectedPacket(id)),
    }

    Ok((profile, textures))
}

async fn handle_configuration(
    ctx: &Arc<ServerContext>,
    conn: &mut Connection,
) -> Result<ClientSettings, SessionError> {
    let mut settings = ClientSettings::default();
    let mut have_client_info = false;

    // The client usually leads with its brand plugin message; don't stall
    // if it never comes.
    if let Some((id, mut data)) = conn.read_packet_timeout(Duration::from_secs(2)).await? {
        let packet = decode_packet(ConnectionState::Configuration, id, &mut data)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match packet {
            Packet::PluginMessage { channel, data } => {
                debug!("client plugin message on {channel} ({} bytes)", data.len());
            }
            Packet::ClientInformation {
                locale,
                view_distance,
                ..
            } => {
                settings.locale = locale;
                settings.view_distance = view_distance;
                have_client_info = true;
            }
            _ => {}
        }
    }

    // Client information, unless it already arrived above.
    if !have_client_info {
        if let Some((id, mut data)) = conn.read_packet_timeout(Duration::from_secs(5)).await? {
            let packet = decode_packet(ConnectionState::Configuration, id, &mut data)
                .map_err(|e| SessionError::Protocol(e.to_string()))?;
            if let Packet::ClientInformation {
                locale,
                view_distance,
                ..
            } = packet
            {
                settings.locale = locale;
                settings.view_distance = view_distance;
            }
        }
    }

    // Our brand.
    let mut brand = bytes::BytesMut::new();
    mattock_protocol::write_string(&mut brand, "mattock");
    send_packet(
        conn,
        ConnectionState::Configuration,
        &Packet::PluginMessageClientbound {
            channel: "minecraft:brand".into(),
            data: brand.to_vec(),
        },
    )
    .await?;

    send_packet(
        conn,
        ConnectionState::Configuration,
        &Packet::KnownPacksRequest {
            packs: vec![KnownPack {
                namespace: "minecraft".into(),
                id: "core".into(),
                version: "1.21.3".into(),
            }],
        },
    )
    .await?;

    // Wait for the client's known packs; tolerate interleaved packets.
    loop {
        let (id, mut data) = conn.read_packet().await?;
        let packet = decode_packet(ConnectionState::Configuration, id, &mut data)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match packet {
            Packet::KnownPacksResponse { packs } => {
                debug!("client knows {} packs", packs.len());
                break;
            }
            Packet::ClientInformation {
                locale,
                view_distance,
                ..
            } => {
                settings.locale = locale;
                settings.view_distance = view_distance;
            }
            Packet::PluginMessage { .. } => {}
            _ => return Err(SessionError::UnexpectedPacket(id)),
        }
    }

    for registry_packet in ctx.registries.registry_packets() {
        send_packet(conn, ConnectionState::Configuration, &registry_packet).await?;
    }

    send_packet(
        conn,
        ConnectionState::Configuration,
        &Packet::UpdateTags {
            registries: vec![ctx.registries.biome_tag_registry()],
        },
    )
    .await?;

    let links: Vec<ServerLink> = ctx
        .config
        .server_links
        .iter()
        .map(|link| ServerLink {
            builtin: link.builtin,
            label: link.label.clone().map(TextComponent::plain),
            url: link.url.clone(),
        })
        .collect();
    if !links.is_empty() {
        send_packet(
            conn,
            ConnectionState::Configuration,
            &Packet::ServerLinks { links },
        )
        .await?;
    }

    send_packet(conn, ConnectionState::Configuration, &Packet::FinishConfiguration).await?;

    loop {
        let (id, mut data) = conn.read_packet().await?;
        let packet = decode_packet(ConnectionState::Configuration, id, &mut data)
            .map_err(|e| SessionError::Protocol(e.to_string()))?;
        match packet {
            Packet::FinishConfigurationAck => return Ok(settings),
            Packet::ClientInformation { .. } | Packet::PluginMessage { .. } => {}
            _ => return Err(SessionError::UnexpectedPacket(id)),
        }
    }
}

async fn handle_play(
    ctx: &Arc<ServerContext>,
    conn: Connection,
    profile: GameProfile,
    textures: Option<mattock_types::ProfileProperty>,
    settings: ClientSettings,
) {
    let (reader, writer) = conn.into_split();
    let handle = Arc::new(ClientHandle::new(profile.uuid, writer));
    let entity_id = ctx.entities.next_entity_id();
    let spawn = ctx.spawn;

    let player = Arc::new(Player::new(
        entity_id,
        profile.clone(),
        handle.clone(),
        spawn,
        ctx.effective_view_distance(settings.view_distance as i32),
    ));
    *player.lang.lock().unwrap() = settings.locale.clone();

    ctx.clients.insert(handle.clone());
    ctx.add_player(player.clone());
    ctx.entities.add(Entity::Player(player.clone()));
    info!("{} joined with entity id {entity_id}", profile.name);

    run_play_session(ctx, reader, &player, &textures).await;

    // Teardown: flag the connection, drop the indexes, tell the others.
    handle.close();
    ctx.clients.remove(&profile.uuid);
    ctx.viewers.remove_everywhere(&profile.uuid);
    ctx.remove_player(&profile.uuid);
    if ctx.entities.remove(&profile.uuid).is_some() {
        ctx.clients
            .broadcast(
                &Packet::RemoveEntities {
                    entity_ids: vec![entity_id],
                },
                None,
            )
            .await;
    }
    ctx.clients
        .broadcast(
            &Packet::PlayerInfoRemove {
                uuids: vec![profile.uuid],
            },
            None,
        )
        .await;
    ctx.clients
        .broadcast(
            &Packet::SystemChatMessage {
                content: TextComponent::translated(
                    "multiplayer.player.left",
                    vec![TextComponent::plain(profile.name.clone())],
                ),
                overlay: false,
            },
            None,
        )
        .await;
    info!("{} disconnected", profile.name);
}

fn info_entry(player: &Player) -> PlayerInfoEntry {
    PlayerInfoEntry {
        uuid: player.uuid,
        name: Some(player.name.clone()),
        properties: player
            .profile
            .properties
            .iter()
            .map(|p| (p.name.clone(), p.value.clone(), p.signature.clone()))
            .collect(),
        game_mode: Some(player.game_mode.lock().unwrap().id() as i32),
        listed: Some(true),
        ping: Some(-1),
        display_name: None,
    }
}

fn spawn_packet_for(player: &Player) -> Packet {
    let position = player.position();
    let rotation = player.rotation();
    Packet::SpawnEntity {
        entity_id: player.entity_id,
        entity_uuid: player.uuid,
        entity_type: ENTITY_TYPE_PLAYER,
        x: position.x,
        y: position.y,
        z: position.z,
        pitch: 0,
        yaw: ((rotation.yaw / 360.0) * 256.0) as i32 as u8,
        head_yaw: ((rotation.head_yaw / 360.0) * 256.0) as i32 as u8,
        data: 0,
        velocity_x: 0,
        velocity_y: 0,
        velocity_z: 0,
    }
}

async fn run_play_session(
    ctx: &Arc<ServerContext>,
    mut reader: ConnectionReader,
    player: &Arc<Player>,
    _textures: &Option<mattock_types::ProfileProperty>,
) {
    let handle = &player.client;
    let spawn = player.position();
    let view_distance = ctx.effective_view_distance(player.view_distance());
    let game_mode = *player.game_mode.lock().unwrap();

    handle
        .send(&Packet::JoinGame {
            entity_id: player.entity_id,
            is_hardcore: false,
            dimension_names: vec!["minecraft:overworld".into()],
            max_players: ctx.config.max_players as i32,
            view_distance,
            simulation_distance: view_distance,
            reduced_debug_info: false,
            enable_respawn_screen: true,
            do_limited_crafting: false,
            dimension_type: 0,
            dimension_name: "minecraft:overworld".into(),
            hashed_seed: 0,
            game_mode,
            previous_game_mode: -1,
            is_debug: false,
            is_flat: true,
            portal_cooldown: 0,
            sea_level: 63,
            enforces_secure_chat: ctx.config.enable_secure_chat,
        })
        .await;

    handle
        .send(&Packet::UpdateRecipes {
            property_sets: Vec::new(),
        })
        .await;

    if let Some(graph) = ctx.commands_wire.get() {
        handle.send(&Packet::Commands { graph: graph.clone() }).await;
    }

    // First position sync; the client must confirm the teleport id before
    // its movement packets count.
    let teleport_id = ctx.next_teleport_id();
    player.begin_teleport(teleport_id);
    handle
        .send(&Packet::SynchronizePlayerPosition {
            teleport_id,
            position: spawn,
            velocity: Vec3d::new(0.0, 0.0, 0.0),
            yaw: 0.0,
            pitch: 0.0,
            flags: 0,
        })
        .await;

    // Player list bookkeeping, both directions.
    let others: Vec<Arc<Player>> = ctx
        .all_players()
        .into_iter()
        .filter(|p| p.uuid != player.uuid)
        .collect();
    if !others.is_empty() {
        let entries = others.iter().map(|p| info_entry(p)).collect();
        handle
            .send(&Packet::PlayerInfoUpdate {
                actions: player_info_actions::ADD_PLAYER | player_info_actions::UPDATE_LISTED,
                players: entries,
            })
            .await;
    }
    ctx.clients
        .broadcast(
            &Packet::PlayerInfoUpdate {
                actions: player_info_actions::ADD_PLAYER | player_info_actions::UPDATE_LISTED,
                players: vec![info_entry(player)],
            },
            None,
        )
        .await;

    // Spawn packets, both directions.
    for other in &others {
        handle.send(&spawn_packet_for(other)).await;
    }
    for entity in ctx.entities.get_all() {
        if let Entity::Item(item) = entity {
            handle.send(&item.spawn_packet()).await;
            handle.send(&item.metadata_packet()).await;
        }
    }
    ctx.clients
        .broadcast(&spawn_packet_for(player), Some(player.uuid))
        .await;

    tokio::spawn(run_keep_alive(handle.clone()));

    ctx.clients
        .broadcast(
            &Packet::SystemChatMessage {
                content: TextComponent::translated(
                    "multiplayer.player.joined",
                    vec![TextComponent::plain(player.name.clone())],
                ),
                overlay: false,
            },
            None,
        )
        .await;

    handle
        .send(&Packet::GameEvent {
            event: mattock_protocol::game_events::START_WAITING_FOR_LEVEL_CHUNKS,
            value: 0.0,
        })
        .await;

    let border_packet = ctx.border.lock().unwrap().init_packet();
    handle.send(&border_packet).await;

    let center = *player.current_chunk.lock().unwrap();
    view::subscribe_initial(ctx, player, center);
    handle
        .send(&Packet::SetCenterChunk {
            chunk_x: center.x,
            chunk_z: center.z,
        })
        .await;

    // Initial chunk delivery happens off the read loop.
    {
        let ctx = ctx.clone();
        let player = player.clone();
        tokio::spawn(async move {
            view::send_initial_chunks(&ctx, &player).await;
        });
    }

    handle
        .send(&Packet::SetDefaultSpawnPosition {
            position: mattock_types::BlockPos::new(
                spawn.x.floor() as i32,
                spawn.y.floor() as i32 - 1,
                spawn.z.floor() as i32,
            ),
            angle: 0.0,
        })
        .await;

    for pack in &ctx.config.resource_packs {
        handle
            .send(&Packet::ResourcePackPush {
                uuid: Uuid::new_v4(),
                url: pack.url.clone(),
                hash: pack.hash.clone(),
                forced: pack.forced,
                prompt: pack.prompt.clone().map(TextComponent::plain),
            })
            .await;
    }

    // The read loop: blocking reads until the socket dies or the handle is
    // closed by the keep-alive watchdog.
    loop {
        if handle.is_closed() {
            break;
        }
        let (id, mut data) = match reader.read_packet().await {
            Ok(frame) => frame,
            Err(e) => {
                debug!("{} read loop ended: {e}", player.name);
                break;
            }
        };
        let packet = match decode_packet(ConnectionState::Play, id, &mut data) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("{} sent an undecodable packet 0x{id:02X}: {e}", player.name);
                break;
            }
        };
        handle_play_packet(ctx, player, packet).await;
    }
}

async fn handle_play_packet(ctx: &Arc<ServerContext>, player: &Arc<Player>, packet: Packet) {
    match packet {
        Packet::ConfirmTeleportation { teleport_id } => {
            if player.confirm_teleport(teleport_id) {
                debug!("{} confirmed teleport {teleport_id}", player.name);
            }
        }
        Packet::SetPlayerPosition { x, y, z, flags } => {
            apply_movement(ctx, player, Some(Vec3d::new(x, y, z)), None, flags & 0x01 != 0).await;
        }
        Packet::SetPlayerPositionAndRotation {
            x,
            y,
            z,
            yaw,
            pitch,
            flags,
        } => {
            apply_movement(
                ctx,
                player,
                Some(Vec3d::new(x, y, z)),
                Some((yaw, pitch)),
                flags & 0x01 != 0,
            )
            .await;
        }
        Packet::SetPlayerRotation { yaw, pitch, flags } => {
            apply_movement(ctx, player, None, Some((yaw, pitch)), flags & 0x01 != 0).await;
        }
        Packet::SetPlayerMovementFlags { flags } => {
            player.on_ground.store(flags & 0x01 != 0, Ordering::Relaxed);
        }
        Packet::KeepAliveServerbound { id } => {
            let expected = player.client.keep_alive_id.load(Ordering::Relaxed);
            if id != expected {
                debug!("{} keep-alive id mismatch: {id} != {expected}", player.name);
            }
            *player.client.last_keep_alive_ack.lock().unwrap() = std::time::Instant::now();
        }
        Packet::ChatMessage {
            message,
            timestamp,
            salt,
            ..
        } => {
            info!("<{}> {}", player.name, message);
            ctx.clients
                .broadcast(
                    &Packet::PlayerChat {
                        sender: player.uuid,
                        sender_name: TextComponent::plain(player.name.clone()),
                        message,
                        timestamp,
                        salt,
                    },
                    None,
                )
                .await;
        }
        Packet::ChatCommand { command } => {
            run_command(ctx, player, &command).await;
        }
        Packet::PlayerSession {
            session_id,
            expires_at,
            public_key_der,
            key_signature,
        } => {
            *player.chat_session.lock().unwrap() = Some(ChatSession {
                session_id,
                expires_at,
                public_key_der,
                key_signature,
            });
        }
        Packet::ClickContainer {
            window_id,
            state_id,
            slot,
            button,
            mode,
            changed_slots,
            carried_item,
        } => {
            let click = ClickPacket {
                window_id,
                state_id,
                slot,
                button,
                mode,
                changed_slots: changed_slots
                    .into_iter()
                    .map(|(index, item)| (index, Slot::from_wire(item)))
                    .collect(),
                carried: Slot::from_wire(carried_item),
            };
            let (actions, dropped) = {
                let mut inventory = player.inventory.lock().unwrap();
                inventory.handle_click(&click, &ctx.recipes)
            };
            for action in actions {
                match action {
                    SyncAction::FullResync => {
                        let (state_id, slots, carried) = {
                            let mut inventory = player.inventory.lock().unwrap();
                            (
                                inventory.next_state_id(),
                                inventory.content_snapshot(),
                                inventory.carried.to_wire(),
                            )
                        };
                        player
                            .client
                            .send(&Packet::SetContainerContent {
                                window_id: 0,
                                state_id,
                                slots,
                                carried_item: carried,
                            })
                            .await;
                    }
                    SyncAction::SlotUpdate(index, slot_value) => {
                        let state_id = player.inventory.lock().unwrap().last_state_id;
                        player
                            .client
                            .send(&Packet::SetContainerSlot {
                                window_id: 0,
                                state_id,
                                slot: index,
                                item: slot_value.to_wire(),
                            })
                            .await;
                    }
                }
            }
            for item in dropped {
                spawn_dropped_item(ctx, player, item).await;
            }
        }
        Packet::CloseContainer { window_id } => {
            debug!("{} closed window {window_id}", player.name);
        }
        Packet::SetHeldItemServerbound { slot } => {
            if (0..9).contains(&slot) {
                player.active_slot.store(slot as u8, Ordering::Relaxed);
            }
        }
        Packet::SetCreativeModeSlot { slot, item } => {
            if slot >= 0 {
                let mut inventory = player.inventory.lock().unwrap();
                inventory.set_slot(slot, Slot::from_wire(item));
            }
        }
        Packet::PlayerAction {
            status,
            position,
            sequence,
            ..
        } => {
            // Creative mode: digging starts and finishes in one packet.
            if status == 0 && *player.game_mode.lock().unwrap() == GameMode::Creative {
                break_block(ctx, player, position, sequence).await;
            }
        }
        Packet::UseItemOn {
            position,
            face,
            sequence,
            ..
        } => {
            place_block(ctx, player, position, face, sequence).await;
        }
        Packet::UseItem { .. }
        | Packet::SwingArm { .. }
        | Packet::PlayerCommandAction { .. }
        | Packet::ClientTickEnd
        | Packet::ChunkBatchReceived { .. }
        | Packet::PluginMessage { .. } => {}
        Packet::ClientInformation {
            locale,
            view_distance,
            ..
        } => {
            *player.lang.lock().unwrap() = locale;
            player
                .view_distance
                .store(view_distance as i32, Ordering::Relaxed);
        }
        Packet::Unknown { packet_id, .. } => {
            debug!("{} sent unhandled packet 0x{packet_id:02X}", player.name);
        }
        other => {
            debug!("{} sent unexpected packet {other:?}", player.name);
        }
    }
}

/// Movement packets are dropped wholesale while a teleport confirm is
/// outstanding, which keeps stale client positions from racing the sync.
async fn apply_movement(
    ctx: &Arc<ServerContext>,
    player: &Arc<Player>,
    new_pos: Option<Vec3d>,
    new_rot: Option<(f32, f32)>,
    on_ground: bool,
) {
    if player.is_awaiting_teleport() {
        return;
    }
    player.on_ground.store(on_ground, Ordering::Relaxed);

    let old_pos = player.position();
    if let Some((yaw, pitch)) = new_rot {
        let mut rotation = player.rotation.lock().unwrap();
        rotation.yaw = yaw;
        rotation.pitch = pitch;
        rotation.head_yaw = yaw;
    }
    let rotation = player.rotation();

    let Some(new_pos) = new_pos else {
        // Rotation only.
        ctx.clients
            .broadcast(
                &Packet::UpdateEntityRotation {
                    entity_id: player.entity_id,
                    yaw: ((rotation.yaw / 360.0) * 256.0) as i32 as u8,
                    pitch: ((rotation.pitch / 360.0) * 256.0) as i32 as u8,
                    on_ground,
                },
                Some(player.uuid),
            )
            .await;
        ctx.clients
            .broadcast(
                &Packet::SetHeadRotation {
                    entity_id: player.entity_id,
                    head_yaw: ((rotation.yaw / 360.0) * 256.0) as i32 as u8,
                },
                Some(player.uuid),
            )
            .await;
        return;
    };

    player.set_position(new_pos);
    view::broadcast_movement(ctx, player, old_pos, new_pos, rotation, on_ground).await;

    let old_chunk = *player.current_chunk.lock().unwrap();
    let new_chunk = new_pos.chunk_pos();
    if new_chunk != old_chunk {
        *player.current_chunk.lock().unwrap() = new_chunk;
        view::update_player_chunk_view(ctx, player, Some(old_chunk), new_chunk).await;
    }
}

async fn break_block(
    ctx: &Arc<ServerContext>,
    player: &Arc<Player>,
    position: mattock_types::BlockPos,
    sequence: i32,
) {
    let chunk_pos = position.chunk_pos();
    let chunk = match ctx.chunks.get_or_load(chunk_pos.x, chunk_pos.z).await {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("break in unavailable chunk: {e}");
            return;
        }
    };
    let local_x = position.x - chunk_pos.x * 16;
    let local_z = position.z - chunk_pos.z * 16;
    let old = chunk.set(local_x, position.y, local_z, 0);
    debug!("{} broke state {old} at {position:?}", player.name);

    // The block update must reach clients before the ack; the ack tells
    // the client to apply server state.
    ctx.viewers
        .chunk_broadcast(
            (chunk_pos.x, chunk_pos.z),
            &Packet::BlockUpdate {
                position,
                block_id: 0,
            },
        )
        .await;
    player
        .client
        .send(&Packet::AcknowledgeBlockChange { sequence })
        .await;
}

/// Blocks the placeable item set maps onto.
fn block_for_item(item_id: i32) -> &'static str {
    use mattock_inventory::items;
    match item_id {
        id if id == items::OAK_LOG => "oak_log",
        id if id == items::OAK_PLANKS => "oak_planks",
        id if id == items::CRAFTING_TABLE => "crafting_table",
        _ => "stone",
    }
}

async fn place_block(
    ctx: &Arc<ServerContext>,
    player: &Arc<Player>,
    clicked: mattock_types::BlockPos,
    face: u8,
    sequence: i32,
) {
    let target = clicked.offset_by_face(face);
    let chunk_pos = target.chunk_pos();
    let chunk = match ctx.chunks.get_or_load(chunk_pos.x, chunk_pos.z).await {
        Ok(chunk) => chunk,
        Err(e) => {
            warn!("place in unavailable chunk: {e}");
            return;
        }
    };

    let held_slot = mattock_inventory::Inventory::hotbar_slot(player.active_slot.load(Ordering::Relaxed));
    let held = player.inventory.lock().unwrap().slot(held_slot);
    let block_name = block_for_item(held.item_id);
    let state = block_states::default_state(block_name).unwrap_or(1);

    let local_x = target.x - chunk_pos.x * 16;
    let local_z = target.z - chunk_pos.z * 16;
    chunk.set(local_x, target.y, local_z, state);
    debug!("{} placed {block_name} at {target:?}", player.name);

    ctx.viewers
        .chunk_broadcast(
            (chunk_pos.x, chunk_pos.z),
            &Packet::BlockUpdate {
                position: target,
                block_id: state,
            },
        )
        .await;
    player
        .client
        .send(&Packet::AcknowledgeBlockChange { sequence })
        .await;
}

/// Spawn an item entity for a stack dropped out of the inventory.
async fn spawn_dropped_item(ctx: &Arc<ServerContext>, player: &Arc<Player>, item: Slot) {
    let position = player.position();
    let spawn_at = Vec3d::new(position.x, position.y + 1.5, position.z);
    let entity = Arc::new(ItemEntity::new(
        ctx.entities.next_entity_id(),
        item,
        spawn_at,
        Vec3d::new(0.0, 0.1, 0.0),
    ));
    ctx.entities.add(Entity::Item(entity.clone()));
    ctx.clients.broadcast(&entity.spawn_packet(), None).await;
    ctx.clients.broadcast(&entity.metadata_packet(), None).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use bytes::{Buf, BufMut, BytesMut};

    fn test_context() -> Arc<ServerContext> {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.world_dir = dir.path().join("world").to_string_lossy().into_owned();
        std::mem::forget(dir);
        ServerContext::new(config, Vec3d::new(0.5, -59.0, 0.5)).unwrap()
    }

    #[tokio::test]
    async fn test_handshake_status_ping_flow() {
        let ctx = test_context();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_ctx = ctx.clone();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(server_ctx, socket).await;
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut client = Connection::new(stream);

        // Handshake: protocol 768, next = status.
        let mut body = BytesMut::new();
        mattock_protocol::write_varint(&mut body, 768);
        mattock_protocol::write_string(&mut body, "localhost");
        body.put_u16(25565);
        mattock_protocol::write_varint(&mut body, 1);
        client.write_packet(0x00, &body).await.unwrap();

        // Status request.
        client.write_packet(0x00, &[]).await.unwrap();
        let (id, mut data) = client.read_packet().await.unwrap();
        assert_eq!(id, 0x00);
        let json = mattock_protocol::read_string(&mut data, 65535).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["version"]["protocol"], 768);

        // Ping: the 8-byte payload comes back verbatim under id 0x01.
        let payload = [0xAAu8, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];
        client.write_packet(0x01, &payload).await.unwrap();
        let (id, mut data) = client.read_packet().await.unwrap();
        assert_eq!(id, 0x01);
        assert_eq!(data.get_i64().to_be_bytes(), payload);

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_next_state_terminates() {
        let ctx = test_context();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server_ctx = ctx.clone();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            handle_connection(server_ctx, socket).await;
        });

        let stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut client = Connection::new(stream);
        let mut body = BytesMut::new();
        mattock_protocol::write_varint(&mut body, 768);
        mattock_protocol::write_string(&mut body, "localhost");
        body.put_u16(25565);
        mattock_protocol::write_varint(&mut body, 9);
        client.write_packet(0x00, &body).await.unwrap();

        // The server drops the connection without replying.
        server.await.unwrap();
        assert!(client.read_packet().await.is_err());
    }
}

/// Parse and execute a slash command; feedback goes back to the invoker as
/// system chat (red for errors).
async fn run_command(ctx: &Arc<ServerContext>, player: &Arc<Player>, command: &str) {
    info!("{} issued /{command}", player.name);
    let position = player.position();
    let invoker = mattock_command::Invoker::Player {
        name: player.name.clone(),
        x: position.x,
        z: position.z,
    };

    let mut outputs: Vec<(String, bool, Vec<String>)> = Vec::new();
    {
        let mut sink = |key: &str, is_error: bool, args: &[String]| {
            outputs.push((key.to_string(), is_error, args.to_vec()));
        };
        if let Some(graph) = ctx.commands.get() {
            let _ = graph.execute(ctx, &invoker, command, &mut sink);
        }
    }

    for (key, is_error, args) in outputs {
        let content = if key.contains('.') {
            let with = args.into_iter().map(TextComponent::plain).collect();
            let mut component = TextComponent::translated(key, with);
            if is_error {
                component.color = Some("red".into());
            }
            component
        } else if is_error {
            TextComponent::colored(key, "red")
        } else {
            TextComponent::plain(key)
        };
        player
            .client
            .send(&Packet::SystemChatMessage {
                content,
                overlay: false,
            })
            .await;
    }
}
