//! Per-phase packet encode/decode for protocol 768 (1.21.3).
//!
//! Decoding takes the packet id plus the framed payload and produces a
//! [`Packet`]; encoding produces the packet body with the id VarInt at the
//! front, ready for the frame layer.

use crate::codec::*;
use crate::packets::*;
use crate::state::ConnectionState;
use anyhow::{bail, Result};
use bytes::{Buf, BufMut, BytesMut};

pub const PROTOCOL_VERSION: i32 = 768;
pub const GAME_VERSION: &str = "1.21.3";

// Status clientbound
pub const STATUS_RESPONSE: i32 = 0x00;
pub const PONG_RESPONSE: i32 = 0x01;

// Login clientbound
pub const LOGIN_DISCONNECT: i32 = 0x00;
pub const ENCRYPTION_REQUEST: i32 = 0x01;
pub const LOGIN_SUCCESS: i32 = 0x02;
pub const SET_COMPRESSION: i32 = 0x03;

// Configuration serverbound
pub const CONFIG_CLIENT_INFORMATION: i32 = 0x00;
pub const CONFIG_PLUGIN_MESSAGE_SB: i32 = 0x02;
pub const CONFIG_FINISH_ACK: i32 = 0x03;
pub const CONFIG_KNOWN_PACKS_SB: i32 = 0x07;

// Configuration clientbound
pub const CONFIG_PLUGIN_MESSAGE: i32 = 0x01;
pub const CONFIG_DISCONNECT: i32 = 0x02;
pub const CONFIG_FINISH: i32 = 0x03;
pub const CONFIG_REGISTRY_DATA: i32 = 0x07;
pub const CONFIG_ADD_RESOURCE_PACK: i32 = 0x09;
pub const CONFIG_UPDATE_TAGS: i32 = 0x0D;
pub const CONFIG_KNOWN_PACKS: i32 = 0x0E;
pub const CONFIG_SERVER_LINKS: i32 = 0x10;

// Play clientbound
pub const PLAY_SPAWN_ENTITY: i32 = 0x01;
pub const PLAY_ACK_BLOCK_CHANGE: i32 = 0x05;
pub const PLAY_BLOCK_UPDATE: i32 = 0x09;
pub const PLAY_CHUNK_BATCH_FINISHED: i32 = 0x0C;
pub const PLAY_CHUNK_BATCH_START: i32 = 0x0D;
pub const PLAY_COMMANDS: i32 = 0x11;
pub const PLAY_CONTAINER_CONTENT: i32 = 0x13;
pub const PLAY_CONTAINER_SLOT: i32 = 0x15;
pub const PLAY_DISCONNECT: i32 = 0x1D;
pub const PLAY_TELEPORT_ENTITY: i32 = 0x20;
pub const PLAY_UNLOAD_CHUNK: i32 = 0x22;
pub const PLAY_GAME_EVENT: i32 = 0x23;
pub const PLAY_INIT_WORLD_BORDER: i32 = 0x26;
pub const PLAY_KEEP_ALIVE: i32 = 0x27;
pub const PLAY_CHUNK_DATA: i32 = 0x28;
pub const PLAY_LOGIN: i32 = 0x2C;
pub const PLAY_ENTITY_POSITION: i32 = 0x2F;
pub const PLAY_ENTITY_POSITION_ROTATION: i32 = 0x30;
pub const PLAY_ENTITY_ROTATION: i32 = 0x32;
pub const PLAY_PLAYER_CHAT: i32 = 0x3B;
pub const PLAY_PLAYER_INFO_REMOVE: i32 = 0x3F;
pub const PLAY_PLAYER_INFO_UPDATE: i32 = 0x40;
pub const PLAY_SYNC_PLAYER_POSITION: i32 = 0x42;
pub const PLAY_REMOVE_ENTITIES: i32 = 0x47;
pub const PLAY_ADD_RESOURCE_PACK: i32 = 0x4B;
pub const PLAY_SET_HEAD_ROTATION: i32 = 0x4D;
pub const PLAY_BORDER_CENTER: i32 = 0x52;
pub const PLAY_BORDER_LERP_SIZE: i32 = 0x53;
pub const PLAY_BORDER_SIZE: i32 = 0x54;
pub const PLAY_BORDER_WARNING_DELAY: i32 = 0x55;
pub const PLAY_BORDER_WARNING_DISTANCE: i32 = 0x56;
pub const PLAY_SET_CENTER_CHUNK: i32 = 0x58;
pub const PLAY_SET_DEFAULT_SPAWN: i32 = 0x5B;
pub const PLAY_ENTITY_METADATA: i32 = 0x5D;
pub const PLAY_ENTITY_VELOCITY: i32 = 0x5F;
pub const PLAY_SET_HELD_ITEM: i32 = 0x63;
pub const PLAY_UPDATE_TIME: i32 = 0x6B;
pub const PLAY_SYSTEM_CHAT: i32 = 0x73;
pub const PLAY_PICKUP_ITEM: i32 = 0x76;
pub const PLAY_UPDATE_RECIPES: i32 = 0x7E;

// Play serverbound
pub const SB_CONFIRM_TELEPORTATION: i32 = 0x00;
pub const SB_CHAT_COMMAND: i32 = 0x05;
pub const SB_CHAT_MESSAGE: i32 = 0x07;
pub const SB_PLAYER_SESSION: i32 = 0x08;
pub const SB_CHUNK_BATCH_RECEIVED: i32 = 0x09;
pub const SB_CLIENT_TICK_END: i32 = 0x0B;
pub const SB_CLIENT_INFORMATION: i32 = 0x0C;
pub const SB_CLICK_CONTAINER: i32 = 0x10;
pub const SB_CLOSE_CONTAINER: i32 = 0x11;
pub const SB_PLUGIN_MESSAGE: i32 = 0x14;
pub const SB_KEEP_ALIVE: i32 = 0x1A;
pub const SB_SET_PLAYER_POSITION: i32 = 0x1C;
pub const SB_SET_PLAYER_POSITION_ROTATION: i32 = 0x1D;
pub const SB_SET_PLAYER_ROTATION: i32 = 0x1E;
pub const SB_SET_PLAYER_MOVEMENT_FLAGS: i32 = 0x1F;
pub const SB_PLAYER_ACTION: i32 = 0x27;
pub const SB_PLAYER_COMMAND: i32 = 0x28;
pub const SB_SET_HELD_ITEM: i32 = 0x33;
pub const SB_SET_CREATIVE_MODE_SLOT: i32 = 0x36;
pub const SB_SWING_ARM: i32 = 0x3A;
pub const SB_USE_ITEM_ON: i32 = 0x3C;
pub const SB_USE_ITEM: i32 = 0x3D;

/// Decode a packet in the given connection phase.
pub fn decode_packet(state: ConnectionState, id: i32, data: &mut BytesMut) -> Result<Packet> {
    match state {
        ConnectionState::Handshaking => decode_handshaking(id, data),
        ConnectionState::Status => decode_status(id, data),
        ConnectionState::Login => decode_login(id, data),
        ConnectionState::Configuration => decode_configuration(id, data),
        ConnectionState::Play | ConnectionState::AwaitingTeleportConfirm => decode_play(id, data),
    }
}

/// Encode a packet for the given connection phase. The result carries the
/// packet id VarInt followed by the payload.
pub fn encode_packet(state: ConnectionState, packet: &Packet) -> Result<BytesMut> {
    match state {
        ConnectionState::Status => encode_status(packet),
        ConnectionState::Login => encode_login(packet),
        ConnectionState::Configuration => encode_configuration(packet),
        ConnectionState::Play | ConnectionState::AwaitingTeleportConfirm => encode_play(packet),
        _ => bail!("cannot encode packets in {:?} state", state),
    }
}

// === Decode functions ===

fn decode_handshaking(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => {
            let protocol_version = read_varint(data)?;
            let server_address = read_string(data, 255)?;
            let server_port = data.get_u16();
            let next_state = read_varint(data)?;
            Ok(Packet::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            })
        }
        _ => Ok(Packet::Unknown {
            packet_id: id,
            data: data.to_vec(),
        }),
    }
}

fn decode_status(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => Ok(Packet::StatusRequest),
        0x01 => {
            let payload = data.get_i64();
            Ok(Packet::PingRequest { payload })
        }
        _ => Ok(Packet::Unknown {
            packet_id: id,
            data: data.to_vec(),
        }),
    }
}

fn decode_login(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        0x00 => {
            let name = read_string(data, 16)?;
            let uuid = read_uuid(data)?;
            Ok(Packet::LoginStart { name, uuid })
        }
        0x01 => {
            let shared_secret = read_byte_array(data)?;
            let verify_token = read_byte_array(data)?;
            Ok(Packet::EncryptionResponse {
                shared_secret,
                verify_token,
            })
        }
        0x03 => Ok(Packet::LoginAcknowledged),
        _ => Ok(Packet::Unknown {
            packet_id: id,
            data: data.to_vec(),
        }),
    }
}

fn decode_client_information(data: &mut BytesMut) -> Result<Packet> {
    let locale = read_string(data, 16)?;
    let view_distance = data.get_i8();
    let chat_mode = read_varint(data)?;
    let chat_colors = read_bool(data)?;
    let skin_parts = data.get_u8();
    let main_hand = read_varint(data)?;
    let text_filtering = read_bool(data)?;
    let allow_listing = read_bool(data)?;
    Ok(Packet::ClientInformation {
        locale,
        view_distance,
        chat_mode,
        chat_colors,
        skin_parts,
        main_hand,
        text_filtering,
        allow_listing,
    })
}

fn decode_plugin_message(data: &mut BytesMut) -> Result<Packet> {
    let channel = read_string(data, 32767)?;
    let remaining = data.to_vec();
    data.advance(remaining.len());
    Ok(Packet::PluginMessage {
        channel,
        data: remaining,
    })
}

fn decode_configuration(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        CONFIG_CLIENT_INFORMATION => decode_client_information(data),
        CONFIG_PLUGIN_MESSAGE_SB => decode_plugin_message(data),
        CONFIG_FINISH_ACK => Ok(Packet::FinishConfigurationAck),
        CONFIG_KNOWN_PACKS_SB => {
            let count = read_varint(data)? as usize;
            let mut packs = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                let namespace = read_string(data, 32767)?;
                let id = read_string(data, 32767)?;
                let version = read_string(data, 32767)?;
                packs.push(KnownPack {
                    namespace,
                    id,
                    version,
                });
            }
            Ok(Packet::KnownPacksResponse { packs })
        }
        _ => Ok(Packet::Unknown {
            packet_id: id,
            data: data.to_vec(),
        }),
    }
}

fn decode_play(id: i32, data: &mut BytesMut) -> Result<Packet> {
    match id {
        SB_CONFIRM_TELEPORTATION => {
            let teleport_id = read_varint(data)?;
            Ok(Packet::ConfirmTeleportation { teleport_id })
        }
        SB_CHAT_COMMAND => {
            let command = read_string(data, 32767)?;
            Ok(Packet::ChatCommand { command })
        }
        SB_CHAT_MESSAGE => {
            let message = read_string(data, 256)?;
            let timestamp = data.get_i64();
            let salt = data.get_i64();
            let signature = if read_bool(data)? {
                if data.remaining() < 256 {
                    bail!("truncated chat signature");
                }
                Some(data.split_to(256).to_vec())
            } else {
                None
            };
            let message_count = read_varint(data)?;
            if data.remaining() < 3 {
                bail!("truncated chat acknowledgment");
            }
            let mut acknowledged = [0u8; 3];
            data.copy_to_slice(&mut acknowledged);
            Ok(Packet::ChatMessage {
                message,
                timestamp,
                salt,
                signature,
                message_count,
                acknowledged,
            })
        }
        SB_PLAYER_SESSION => {
            let session_id = read_uuid(data)?;
            let expires_at = data.get_i64();
            let public_key_der = read_byte_array(data)?;
            let key_signature = read_byte_array(data)?;
            Ok(Packet::PlayerSession {
                session_id,
                expires_at,
                public_key_der,
                key_signature,
            })
        }
        SB_CHUNK_BATCH_RECEIVED => {
            let chunks_per_tick = data.get_f32();
            Ok(Packet::ChunkBatchReceived { chunks_per_tick })
        }
        SB_CLIENT_TICK_END => Ok(Packet::ClientTickEnd),
        SB_CLIENT_INFORMATION => decode_client_information(data),
        SB_CLICK_CONTAINER => {
            let window_id = read_varint(data)? as u8;
            let state_id = read_varint(data)?;
            let slot = data.get_i16();
            let button = data.get_i8();
            let mode = read_varint(data)?;
            let count = read_varint(data)? as usize;
            let mut changed_slots = Vec::with_capacity(count.min(128));
            for _ in 0..count {
                let slot_idx = data.get_i16();
                let item = read_slot(data)?;
                changed_slots.push((slot_idx, item));
            }
            let carried_item = read_slot(data)?;
            Ok(Packet::ClickContainer {
                window_id,
                state_id,
                slot,
                button,
                mode,
                changed_slots,
                carried_item,
            })
        }
        SB_CLOSE_CONTAINER => {
            let window_id = read_varint(data)? as u8;
            Ok(Packet::CloseContainer { window_id })
        }
        SB_PLUGIN_MESSAGE => decode_plugin_message(data),
        SB_KEEP_ALIVE => {
            let id = data.get_i64();
            Ok(Packet::KeepAliveServerbound { id })
        }
        SB_SET_PLAYER_POSITION => {
            let x = data.get_f64();
            let y = data.get_f64();
            let z = data.get_f64();
            let flags = data.get_u8();
            Ok(Packet::SetPlayerPosition { x, y, z, flags })
        }
        SB_SET_PLAYER_POSITION_ROTATION => {
            let x = data.get_f64();
            let y = data.get_f64();
            let z = data.get_f64();
            let yaw = data.get_f32();
            let pitch = data.get_f32();
            let flags = data.get_u8();
            Ok(Packet::SetPlayerPositionAndRotation {
                x,
                y,
                z,
                yaw,
                pitch,
                flags,
            })
        }
        SB_SET_PLAYER_ROTATION => {
            let yaw = data.get_f32();
            let pitch = data.get_f32();
            let flags = data.get_u8();
            Ok(Packet::SetPlayerRotation { yaw, pitch, flags })
        }
        SB_SET_PLAYER_MOVEMENT_FLAGS => {
            let flags = data.get_u8();
            Ok(Packet::SetPlayerMovementFlags { flags })
        }
        SB_PLAYER_ACTION => {
            let status = read_varint(data)?;
            let position = read_position(data)?;
            let face = data.get_u8();
            let sequence = read_varint(data)?;
            Ok(Packet::PlayerAction {
                status,
                position,
                face,
                sequence,
            })
        }
        SB_PLAYER_COMMAND => {
            let entity_id = read_varint(data)?;
            let action = read_varint(data)?;
            let jump_boost = read_varint(data)?;
            Ok(Packet::PlayerCommandAction {
                entity_id,
                action,
                jump_boost,
            })
        }
        SB_SET_HELD_ITEM => {
            let slot = data.get_i16();
            Ok(Packet::SetHeldItemServerbound { slot })
        }
        SB_SET_CREATIVE_MODE_SLOT => {
            let slot = data.get_i16();
            let item = read_slot(data)?;
            Ok(Packet::SetCreativeModeSlot { slot, item })
        }
        SB_SWING_ARM => {
            let hand = read_varint(data)?;
            Ok(Packet::SwingArm { hand })
        }
        SB_USE_ITEM_ON => {
            let hand = read_varint(data)?;
            let position = read_position(data)?;
            let face = read_varint(data)? as u8;
            let cursor_x = data.get_f32();
            let cursor_y = data.get_f32();
            let cursor_z = data.get_f32();
            let inside_block = read_bool(data)?;
            let world_border_hit = read_bool(data)?;
            let sequence = read_varint(data)?;
            Ok(Packet::UseItemOn {
                hand,
                position,
                face,
                cursor_x,
                cursor_y,
                cursor_z,
                inside_block,
                world_border_hit,
                sequence,
            })
        }
        SB_USE_ITEM => {
            let hand = read_varint(data)?;
            let sequence = read_varint(data)?;
            let yaw = data.get_f32();
            let pitch = data.get_f32();
            Ok(Packet::UseItem {
                hand,
                sequence,
                yaw,
                pitch,
            })
        }
        _ => Ok(Packet::Unknown {
            packet_id: id,
            data: data.to_vec(),
        }),
    }
}

// === Encode functions ===

fn write_nbt_component(buf: &mut BytesMut, component: &mattock_types::TextComponent) {
    // Components go over the wire as nameless NBT.
    let mut entries = Vec::new();
    if let Some(ref key) = component.translate {
        entries.push((
            "translate".to_string(),
            mattock_nbt::NbtValue::String(key.clone()),
        ));
        if !component.with.is_empty() {
            let with = component
                .with
                .iter()
                .map(|c| {
                    mattock_nbt::NbtValue::Compound(vec![(
                        "text".to_string(),
                        mattock_nbt::NbtValue::String(c.text.clone()),
                    )])
                })
                .collect();
            entries.push(("with".to_string(), mattock_nbt::NbtValue::List(with)));
        }
    } else {
        entries.push((
            "text".to_string(),
            mattock_nbt::NbtValue::String(component.text.clone()),
        ));
    }
    if let Some(ref color) = component.color {
        entries.push((
            "color".to_string(),
            mattock_nbt::NbtValue::String(color.clone()),
        ));
    }
    mattock_nbt::NbtValue::Compound(entries).write_root_network(buf);
}

fn encode_status(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::StatusResponse { json } => {
            write_varint(&mut buf, STATUS_RESPONSE);
            write_string(&mut buf, json);
        }
        Packet::PongResponse { payload } => {
            write_varint(&mut buf, PONG_RESPONSE);
            buf.put_i64(*payload);
        }
        _ => bail!("cannot encode {:?} in Status state", std::mem::discriminant(packet)),
    }
    Ok(buf)
}

fn encode_login(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::Disconnect { reason } => {
            write_varint(&mut buf, LOGIN_DISCONNECT);
            // Login disconnect reasons are JSON strings, not NBT.
            write_string(&mut buf, &reason.to_json());
        }
        Packet::EncryptionRequest {
            server_id,
            public_key,
            verify_token,
            should_authenticate,
        } => {
            write_varint(&mut buf, ENCRYPTION_REQUEST);
            write_string(&mut buf, server_id);
            write_byte_array(&mut buf, public_key);
            write_byte_array(&mut buf, verify_token);
            write_bool(&mut buf, *should_authenticate);
        }
        Packet::LoginSuccess { profile } => {
            write_varint(&mut buf, LOGIN_SUCCESS);
            write_uuid(&mut buf, &profile.uuid);
            write_string(&mut buf, &profile.name);
            write_varint(&mut buf, profile.properties.len() as i32);
            for prop in &profile.properties {
                write_string(&mut buf, &prop.name);
                write_string(&mut buf, &prop.value);
                match prop.signature {
                    Some(ref sig) => {
                        write_bool(&mut buf, true);
                        write_string(&mut buf, sig);
                    }
                    None => write_bool(&mut buf, false),
                }
            }
        }
        Packet::SetCompression { threshold } => {
            write_varint(&mut buf, SET_COMPRESSION);
            write_varint(&mut buf, *threshold);
        }
        _ => bail!("cannot encode {:?} in Login state", std::mem::discriminant(packet)),
    }
    Ok(buf)
}

fn encode_configuration(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::PluginMessageClientbound { channel, data } => {
            write_varint(&mut buf, CONFIG_PLUGIN_MESSAGE);
            write_string(&mut buf, channel);
            buf.put_slice(data);
        }
        Packet::RegistryData {
            registry_id,
            entries,
        } => {
            write_varint(&mut buf, CONFIG_REGISTRY_DATA);
            write_string(&mut buf, registry_id);
            write_varint(&mut buf, entries.len() as i32);
            for entry in entries {
                write_string(&mut buf, &entry.id);
                match entry.data {
                    Some(ref nbt) => {
                        write_bool(&mut buf, true);
                        nbt.write_root_network(&mut buf);
                    }
                    None => write_bool(&mut buf, false),
                }
            }
        }
        Packet::UpdateTags { registries } => {
            write_varint(&mut buf, CONFIG_UPDATE_TAGS);
            write_varint(&mut buf, registries.len() as i32);
            for reg in registries {
                write_string(&mut buf, &reg.registry);
                write_varint(&mut buf, reg.tags.len() as i32);
                for (tag, ids) in &reg.tags {
                    write_string(&mut buf, tag);
                    write_varint(&mut buf, ids.len() as i32);
                    for id in ids {
                        write_varint(&mut buf, *id);
                    }
                }
            }
        }
        Packet::ServerLinks { links } => {
            write_varint(&mut buf, CONFIG_SERVER_LINKS);
            write_varint(&mut buf, links.len() as i32);
            for link in links {
                match link.builtin {
                    Some(kind) => {
                        write_bool(&mut buf, true);
                        write_varint(&mut buf, kind);
                    }
                    None => {
                        write_bool(&mut buf, false);
                        let fallback = mattock_types::TextComponent::default();
                        write_nbt_component(&mut buf, link.label.as_ref().unwrap_or(&fallback));
                    }
                }
                write_string(&mut buf, &link.url);
            }
        }
        Packet::ResourcePackPush {
            uuid,
            url,
            hash,
            forced,
            prompt,
        } => {
            write_varint(&mut buf, CONFIG_ADD_RESOURCE_PACK);
            write_uuid(&mut buf, uuid);
            write_string(&mut buf, url);
            write_string(&mut buf, hash);
            write_bool(&mut buf, *forced);
            match prompt {
                Some(component) => {
                    write_bool(&mut buf, true);
                    write_nbt_component(&mut buf, component);
                }
                None => write_bool(&mut buf, false),
            }
        }
        Packet::FinishConfiguration => {
            write_varint(&mut buf, CONFIG_FINISH);
        }
        Packet::KnownPacksRequest { packs } => {
            write_varint(&mut buf, CONFIG_KNOWN_PACKS);
            write_varint(&mut buf, packs.len() as i32);
            for pack in packs {
                write_string(&mut buf, &pack.namespace);
                write_string(&mut buf, &pack.id);
                write_string(&mut buf, &pack.version);
            }
        }
        Packet::Disconnect { reason } => {
            write_varint(&mut buf, CONFIG_DISCONNECT);
            write_nbt_component(&mut buf, reason);
        }
        _ => bail!(
            "cannot encode {:?} in Configuration state",
            std::mem::discriminant(packet)
        ),
    }
    Ok(buf)
}

fn encode_play(packet: &Packet) -> Result<BytesMut> {
    let mut buf = BytesMut::new();
    match packet {
        Packet::SpawnEntity {
            entity_id,
            entity_uuid,
            entity_type,
            x,
            y,
            z,
            pitch,
            yaw,
            head_yaw,
            data,
            velocity_x,
            velocity_y,
            velocity_z,
        } => {
            write_varint(&mut buf, PLAY_SPAWN_ENTITY);
            write_varint(&mut buf, *entity_id);
            write_uuid(&mut buf, entity_uuid);
            write_varint(&mut buf, *entity_type);
            buf.put_f64(*x);
            buf.put_f64(*y);
            buf.put_f64(*z);
            buf.put_u8(*pitch);
            buf.put_u8(*yaw);
            buf.put_u8(*head_yaw);
            write_varint(&mut buf, *data);
            buf.put_i16(*velocity_x);
            buf.put_i16(*velocity_y);
            buf.put_i16(*velocity_z);
        }
        Packet::AcknowledgeBlockChange { sequence } => {
            write_varint(&mut buf, PLAY_ACK_BLOCK_CHANGE);
            write_varint(&mut buf, *sequence);
        }
        Packet::BlockUpdate { position, block_id } => {
            write_varint(&mut buf, PLAY_BLOCK_UPDATE);
            write_position(&mut buf, position);
            write_varint(&mut buf, *block_id);
        }
        Packet::ChunkBatchStart => {
            write_varint(&mut buf, PLAY_CHUNK_BATCH_START);
        }
        Packet::ChunkBatchFinished { batch_size } => {
            write_varint(&mut buf, PLAY_CHUNK_BATCH_FINISHED);
            write_varint(&mut buf, *batch_size);
        }
        Packet::Commands { graph } => {
            write_varint(&mut buf, PLAY_COMMANDS);
            buf.put_slice(graph);
        }
        Packet::SetContainerContent {
            window_id,
            state_id,
            slots,
            carried_item,
        } => {
            write_varint(&mut buf, PLAY_CONTAINER_CONTENT);
            write_varint(&mut buf, *window_id as i32);
            write_varint(&mut buf, *state_id);
            write_varint(&mut buf, slots.len() as i32);
            for slot in slots {
                write_slot(&mut buf, slot);
            }
            write_slot(&mut buf, carried_item);
        }
        Packet::SetContainerSlot {
            window_id,
            state_id,
            slot,
            item,
        } => {
            write_varint(&mut buf, PLAY_CONTAINER_SLOT);
            write_varint(&mut buf, *window_id as i32);
            write_varint(&mut buf, *state_id);
            buf.put_i16(*slot);
            write_slot(&mut buf, item);
        }
        Packet::Disconnect { reason } => {
            write_varint(&mut buf, PLAY_DISCONNECT);
            write_nbt_component(&mut buf, reason);
        }
        Packet::TeleportEntity {
            entity_id,
            x,
            y,
            z,
            velocity,
            yaw,
            pitch,
            on_ground,
        } => {
            write_varint(&mut buf, PLAY_TELEPORT_ENTITY);
            write_varint(&mut buf, *entity_id);
            buf.put_f64(*x);
            buf.put_f64(*y);
            buf.put_f64(*z);
            buf.put_f64(velocity.x);
            buf.put_f64(velocity.y);
            buf.put_f64(velocity.z);
            buf.put_f32(*yaw);
            buf.put_f32(*pitch);
            write_bool(&mut buf, *on_ground);
        }
        Packet::UnloadChunk { chunk_x, chunk_z } => {
            write_varint(&mut buf, PLAY_UNLOAD_CHUNK);
            // Z before X in this packet.
            buf.put_i32(*chunk_z);
            buf.put_i32(*chunk_x);
        }
        Packet::GameEvent { event, value } => {
            write_varint(&mut buf, PLAY_GAME_EVENT);
            buf.put_u8(*event);
            buf.put_f32(*value);
        }
        Packet::InitializeWorldBorder {
            center_x,
            center_z,
            old_diameter,
            new_diameter,
            speed_ms,
            portal_teleport_boundary,
            warning_blocks,
            warning_time,
        } => {
            write_varint(&mut buf, PLAY_INIT_WORLD_BORDER);
            buf.put_f64(*center_x);
            buf.put_f64(*center_z);
            buf.put_f64(*old_diameter);
            buf.put_f64(*new_diameter);
            write_varlong(&mut buf, *speed_ms);
            write_varint(&mut buf, *portal_teleport_boundary);
            write_varint(&mut buf, *warning_blocks);
            write_varint(&mut buf, *warning_time);
        }
        Packet::SetBorderCenter { center_x, center_z } => {
            write_varint(&mut buf, PLAY_BORDER_CENTER);
            buf.put_f64(*center_x);
            buf.put_f64(*center_z);
        }
        Packet::SetBorderLerpSize {
            old_diameter,
            new_diameter,
            speed_ms,
        } => {
            write_varint(&mut buf, PLAY_BORDER_LERP_SIZE);
            buf.put_f64(*old_diameter);
            buf.put_f64(*new_diameter);
            write_varlong(&mut buf, *speed_ms);
        }
        Packet::SetBorderSize { diameter } => {
            write_varint(&mut buf, PLAY_BORDER_SIZE);
            buf.put_f64(*diameter);
        }
        Packet::SetBorderWarningDelay { warning_time } => {
            write_varint(&mut buf, PLAY_BORDER_WARNING_DELAY);
            write_varint(&mut buf, *warning_time);
        }
        Packet::SetBorderWarningDistance { warning_blocks } => {
            write_varint(&mut buf, PLAY_BORDER_WARNING_DISTANCE);
            write_varint(&mut buf, *warning_blocks);
        }
        Packet::KeepAliveClientbound { id } => {
            write_varint(&mut buf, PLAY_KEEP_ALIVE);
            buf.put_i64(*id);
        }
        Packet::ChunkDataAndUpdateLight {
            chunk_x,
            chunk_z,
            heightmaps,
            data,
            block_entities,
            light_data,
        } => {
            write_varint(&mut buf, PLAY_CHUNK_DATA);
            buf.put_i32(*chunk_x);
            buf.put_i32(*chunk_z);
            heightmaps.write_root_network(&mut buf);
            write_varint(&mut buf, data.len() as i32);
            buf.put_slice(data);
            // Block entities (count only; none are modelled).
            write_varint(&mut buf, 0);
            let _ = block_entities;
            encode_light_data(&mut buf, light_data);
        }
        Packet::JoinGame {
            entity_id,
            is_hardcore,
            dimension_names,
            max_players,
            view_distance,
            simulation_distance,
            reduced_debug_info,
            enable_respawn_screen,
            do_limited_crafting,
            dimension_type,
            dimension_name,
            hashed_seed,
            game_mode,
            previous_game_mode,
            is_debug,
            is_flat,
            portal_cooldown,
            sea_level,
            enforces_secure_chat,
        } => {
            write_varint(&mut buf, PLAY_LOGIN);
            buf.put_i32(*entity_id);
            write_bool(&mut buf, *is_hardcore);
            write_varint(&mut buf, dimension_names.len() as i32);
            for dim in dimension_names {
                write_string(&mut buf, dim);
            }
            write_varint(&mut buf, *max_players);
            write_varint(&mut buf, *view_distance);
            write_varint(&mut buf, *simulation_distance);
            write_bool(&mut buf, *reduced_debug_info);
            write_bool(&mut buf, *enable_respawn_screen);
            write_bool(&mut buf, *do_limited_crafting);
            write_varint(&mut buf, *dimension_type);
            write_string(&mut buf, dimension_name);
            buf.put_i64(*hashed_seed);
            buf.put_u8(game_mode.id());
            buf.put_i8(*previous_game_mode);
            write_bool(&mut buf, *is_debug);
            write_bool(&mut buf, *is_flat);
            // Death location: not present.
            write_bool(&mut buf, false);
            write_varint(&mut buf, *portal_cooldown);
            write_varint(&mut buf, *sea_level);
            write_bool(&mut buf, *enforces_secure_chat);
        }
        Packet::UpdateEntityPosition {
            entity_id,
            delta_x,
            delta_y,
            delta_z,
            on_ground,
        } => {
            write_varint(&mut buf, PLAY_ENTITY_POSITION);
            write_varint(&mut buf, *entity_id);
            buf.put_i16(*delta_x);
            buf.put_i16(*delta_y);
            buf.put_i16(*delta_z);
            write_bool(&mut buf, *on_ground);
        }
        Packet::UpdateEntityPositionAndRotation {
            entity_id,
            delta_x,
            delta_y,
            delta_z,
            yaw,
            pitch,
            on_ground,
        } => {
            write_varint(&mut buf, PLAY_ENTITY_POSITION_ROTATION);
            write_varint(&mut buf, *entity_id);
            buf.put_i16(*delta_x);
            buf.put_i16(*delta_y);
            buf.put_i16(*delta_z);
            buf.put_u8(*yaw);
            buf.put_u8(*pitch);
            write_bool(&mut buf, *on_ground);
        }
        Packet::UpdateEntityRotation {
            entity_id,
            yaw,
            pitch,
            on_ground,
        } => {
            write_varint(&mut buf, PLAY_ENTITY_ROTATION);
            write_varint(&mut buf, *entity_id);
            buf.put_u8(*yaw);
            buf.put_u8(*pitch);
            write_bool(&mut buf, *on_ground);
        }
        Packet::PlayerChat {
            sender,
            sender_name,
            message,
            timestamp,
            salt,
        } => {
            write_varint(&mut buf, PLAY_PLAYER_CHAT);
            write_uuid(&mut buf, sender);
            write_varint(&mut buf, 0); // message index
            write_bool(&mut buf, false); // no signature
            write_string(&mut buf, message);
            buf.put_i64(*timestamp);
            buf.put_i64(*salt);
            write_varint(&mut buf, 0); // previous messages
            write_bool(&mut buf, false); // no unsigned content
            write_varint(&mut buf, 0); // filter type: pass through
            write_varint(&mut buf, 1); // chat type: minecraft:chat (registry id + 1)
            write_nbt_component(&mut buf, sender_name);
            write_bool(&mut buf, false); // no target name
        }
        Packet::PlayerInfoRemove { uuids } => {
            write_varint(&mut buf, PLAY_PLAYER_INFO_REMOVE);
            write_varint(&mut buf, uuids.len() as i32);
            for uuid in uuids {
                write_uuid(&mut buf, uuid);
            }
        }
        Packet::PlayerInfoUpdate { actions, players } => {
            write_varint(&mut buf, PLAY_PLAYER_INFO_UPDATE);
            buf.put_u8(*actions);
            write_varint(&mut buf, players.len() as i32);
            for entry in players {
                write_uuid(&mut buf, &entry.uuid);
                if actions & player_info_actions::ADD_PLAYER != 0 {
                    write_string(&mut buf, entry.name.as_deref().unwrap_or(""));
                    write_varint(&mut buf, entry.properties.len() as i32);
                    for (name, value, signature) in &entry.properties {
                        write_string(&mut buf, name);
                        write_string(&mut buf, value);
                        match signature {
                            Some(sig) => {
                                write_bool(&mut buf, true);
                                write_string(&mut buf, sig);
                            }
                            None => write_bool(&mut buf, false),
                        }
                    }
                }
                if actions & player_info_actions::UPDATE_GAME_MODE != 0 {
                    write_varint(&mut buf, entry.game_mode.unwrap_or(0));
                }
                if actions & player_info_actions::UPDATE_LISTED != 0 {
                    write_bool(&mut buf, entry.listed.unwrap_or(true));
                }
                if actions & player_info_actions::UPDATE_LATENCY != 0 {
                    write_varint(&mut buf, entry.ping.unwrap_or(-1));
                }
                if actions & player_info_actions::UPDATE_DISPLAY_NAME != 0 {
                    match entry.display_name {
                        Some(ref name) => {
                            write_bool(&mut buf, true);
                            write_nbt_component(&mut buf, name);
                        }
                        None => write_bool(&mut buf, false),
                    }
                }
            }
        }
        Packet::SynchronizePlayerPosition {
            teleport_id,
            position,
            velocity,
            yaw,
            pitch,
            flags,
        } => {
            write_varint(&mut buf, PLAY_SYNC_PLAYER_POSITION);
            write_varint(&mut buf, *teleport_id);
            buf.put_f64(position.x);
            buf.put_f64(position.y);
            buf.put_f64(position.z);
            buf.put_f64(velocity.x);
            buf.put_f64(velocity.y);
            buf.put_f64(velocity.z);
            buf.put_f32(*yaw);
            buf.put_f32(*pitch);
            buf.put_i32(*flags);
        }
        Packet::RemoveEntities { entity_ids } => {
            write_varint(&mut buf, PLAY_REMOVE_ENTITIES);
            write_varint(&mut buf, entity_ids.len() as i32);
            for id in entity_ids {
                write_varint(&mut buf, *id);
            }
        }
        Packet::ResourcePackPush {
            uuid,
            url,
            hash,
            forced,
            prompt,
        } => {
            write_varint(&mut buf, PLAY_ADD_RESOURCE_PACK);
            write_uuid(&mut buf, uuid);
            write_string(&mut buf, url);
            write_string(&mut buf, hash);
            write_bool(&mut buf, *forced);
            match prompt {
                Some(component) => {
                    write_bool(&mut buf, true);
                    write_nbt_component(&mut buf, component);
                }
                None => write_bool(&mut buf, false),
            }
        }
        Packet::SetHeadRotation {
            entity_id,
            head_yaw,
        } => {
            write_varint(&mut buf, PLAY_SET_HEAD_ROTATION);
            write_varint(&mut buf, *entity_id);
            buf.put_u8(*head_yaw);
        }
        Packet::SetCenterChunk { chunk_x, chunk_z } => {
            write_varint(&mut buf, PLAY_SET_CENTER_CHUNK);
            write_varint(&mut buf, *chunk_x);
            write_varint(&mut buf, *chunk_z);
        }
        Packet::SetDefaultSpawnPosition { position, angle } => {
            write_varint(&mut buf, PLAY_SET_DEFAULT_SPAWN);
            write_position(&mut buf, position);
            buf.put_f32(*angle);
        }
        Packet::SetEntityMetadata {
            entity_id,
            metadata,
        } => {
            write_varint(&mut buf, PLAY_ENTITY_METADATA);
            write_varint(&mut buf, *entity_id);
            for entry in metadata {
                buf.put_u8(entry.index);
                write_varint(&mut buf, entry.type_id);
                buf.put_slice(&entry.data);
            }
            buf.put_u8(0xFF);
        }
        Packet::SetEntityVelocity {
            entity_id,
            velocity_x,
            velocity_y,
            velocity_z,
        } => {
            write_varint(&mut buf, PLAY_ENTITY_VELOCITY);
            write_varint(&mut buf, *entity_id);
            buf.put_i16(*velocity_x);
            buf.put_i16(*velocity_y);
            buf.put_i16(*velocity_z);
        }
        Packet::SetHeldItemClientbound { slot } => {
            write_varint(&mut buf, PLAY_SET_HELD_ITEM);
            buf.put_i8(*slot);
        }
        Packet::UpdateTime {
            world_age,
            time_of_day,
            time_advances,
        } => {
            write_varint(&mut buf, PLAY_UPDATE_TIME);
            buf.put_i64(*world_age);
            buf.put_i64(*time_of_day);
            write_bool(&mut buf, *time_advances);
        }
        Packet::SystemChatMessage { content, overlay } => {
            write_varint(&mut buf, PLAY_SYSTEM_CHAT);
            write_nbt_component(&mut buf, content);
            write_bool(&mut buf, *overlay);
        }
        Packet::PickupItem {
            collected_entity_id,
            collector_entity_id,
            count,
        } => {
            write_varint(&mut buf, PLAY_PICKUP_ITEM);
            write_varint(&mut buf, *collected_entity_id);
            write_varint(&mut buf, *collector_entity_id);
            write_varint(&mut buf, *count);
        }
        Packet::UpdateRecipes { property_sets } => {
            write_varint(&mut buf, PLAY_UPDATE_RECIPES);
            write_varint(&mut buf, property_sets.len() as i32);
            for (name, ids) in property_sets {
                write_string(&mut buf, name);
                write_varint(&mut buf, ids.len() as i32);
                for id in ids {
                    write_varint(&mut buf, *id);
                }
            }
            // Stonecutter recipes: none.
            write_varint(&mut buf, 0);
        }
        _ => bail!("cannot encode {:?} in Play state", std::mem::discriminant(packet)),
    }
    Ok(buf)
}

fn encode_light_data(buf: &mut BytesMut, light: &ChunkLightData) {
    write_varint(buf, light.sky_light_mask.len() as i32);
    for v in &light.sky_light_mask {
        buf.put_i64(*v);
    }
    write_varint(buf, light.block_light_mask.len() as i32);
    for v in &light.block_light_mask {
        buf.put_i64(*v);
    }
    write_varint(buf, light.empty_sky_light_mask.len() as i32);
    for v in &light.empty_sky_light_mask {
        buf.put_i64(*v);
    }
    write_varint(buf, light.empty_block_light_mask.len() as i32);
    for v in &light.empty_block_light_mask {
        buf.put_i64(*v);
    }
    write_varint(buf, light.sky_light_arrays.len() as i32);
    for arr in &light.sky_light_arrays {
        write_varint(buf, arr.len() as i32);
        buf.put_slice(arr);
    }
    write_varint(buf, light.block_light_arrays.len() as i32);
    for arr in &light.block_light_arrays {
        write_varint(buf, arr.len() as i32);
        buf.put_slice(arr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_handshake_literal_bytes() {
        // Protocol 764, "localhost", port 25565, next = status.
        let raw: Vec<u8> = {
            let mut v = vec![0xFC, 0x05];
            v.push(9);
            v.extend_from_slice(b"localhost");
            v.extend_from_slice(&[0x63, 0xDD]);
            v.push(0x01);
            v
        };
        let mut data = BytesMut::from(&raw[..]);
        let packet = decode_packet(ConnectionState::Handshaking, 0x00, &mut data).unwrap();
        match packet {
            Packet::Handshake {
                protocol_version,
                server_address,
                server_port,
                next_state,
            } => {
                assert_eq!(protocol_version, 764);
                assert_eq!(server_address, "localhost");
                assert_eq!(server_port, 25565);
                assert_eq!(next_state, 1);
            }
            other => panic!("expected handshake, got {other:?}"),
        }
    }

    #[test]
    fn test_ping_echoes_payload() {
        let raw = [0xAAu8, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, 0x00, 0x11];
        let mut data = BytesMut::from(&raw[..]);
        let packet = decode_packet(ConnectionState::Status, 0x01, &mut data).unwrap();
        let payload = match packet {
            Packet::PingRequest { payload } => payload,
            other => panic!("expected ping, got {other:?}"),
        };
        let encoded = encode_packet(ConnectionState::Status, &Packet::PongResponse { payload })
            .unwrap();
        // id 0x01, then the same 8 bytes.
        assert_eq!(&encoded[..], &[&[0x01u8][..], &raw[..]].concat()[..]);
    }

    #[test]
    fn test_status_response_id() {
        let encoded = encode_packet(
            ConnectionState::Status,
            &Packet::StatusResponse {
                json: r#"{"version":{"protocol":768}}"#.into(),
            },
        )
        .unwrap();
        assert_eq!(encoded[0], STATUS_RESPONSE as u8);
    }

    #[test]
    fn test_decode_login_start() {
        let mut raw = BytesMut::new();
        write_string(&mut raw, "Steve");
        write_uuid(&mut raw, &uuid::Uuid::nil());
        let packet = decode_packet(ConnectionState::Login, 0x00, &mut raw).unwrap();
        match packet {
            Packet::LoginStart { name, uuid } => {
                assert_eq!(name, "Steve");
                assert!(uuid.is_nil());
            }
            other => panic!("expected login start, got {other:?}"),
        }
    }

    #[test]
    fn test_click_container_roundtrip_fields() {
        use mattock_types::ItemStack;
        let mut raw = BytesMut::new();
        write_varint(&mut raw, 0); // window id
        write_varint(&mut raw, 3); // state id
        raw.put_i16(1); // slot
        raw.put_i8(0); // button
        write_varint(&mut raw, 0); // mode
        write_varint(&mut raw, 1); // changed slots
        raw.put_i16(1);
        write_slot(&mut raw, &Some(ItemStack::new(36, 4)));
        write_slot(&mut raw, &None); // carried

        let packet = decode_packet(ConnectionState::Play, SB_CLICK_CONTAINER, &mut raw).unwrap();
        match packet {
            Packet::ClickContainer {
                window_id,
                state_id,
                slot,
                button,
                mode,
                changed_slots,
                carried_item,
            } => {
                assert_eq!(window_id, 0);
                assert_eq!(state_id, 3);
                assert_eq!(slot, 1);
                assert_eq!(button, 0);
                assert_eq!(mode, 0);
                assert_eq!(changed_slots, vec![(1, Some(ItemStack::new(36, 4)))]);
                assert_eq!(carried_item, None);
            }
            other => panic!("expected click container, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_play_packet_preserved() {
        let mut raw = BytesMut::from(&[1u8, 2, 3][..]);
        let packet = decode_packet(ConnectionState::Play, 0x7F, &mut raw).unwrap();
        match packet {
            Packet::Unknown { packet_id, data } => {
                assert_eq!(packet_id, 0x7F);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("expected unknown, got {other:?}"),
        }
    }
}
