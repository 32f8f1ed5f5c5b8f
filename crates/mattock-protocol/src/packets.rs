use mattock_nbt::NbtValue;
use mattock_types::{BlockPos, GameMode, GameProfile, ItemStack, TextComponent, Vec3d};
use uuid::Uuid;

/// Decoded packet representation for protocol 768 (1.21.3).
/// `wire` converts between these and the phase-scoped wire format.
#[derive(Debug, Clone)]
pub enum Packet {
    // === Handshaking (serverbound) ===
    Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        next_state: i32,
    },

    // === Status ===
    StatusRequest,
    StatusResponse {
        json: String,
    },
    PingRequest {
        payload: i64,
    },
    PongResponse {
        payload: i64,
    },

    // === Login (serverbound) ===
    LoginStart {
        name: String,
        uuid: Uuid,
    },
    EncryptionResponse {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    },
    LoginAcknowledged,

    // === Login (clientbound) ===
    EncryptionRequest {
        server_id: String,
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
        should_authenticate: bool,
    },
    SetCompression {
        threshold: i32,
    },
    LoginSuccess {
        profile: GameProfile,
    },

    // === Configuration (serverbound) ===
    ClientInformation {
        locale: String,
        view_distance: i8,
        chat_mode: i32,
        chat_colors: bool,
        skin_parts: u8,
        main_hand: i32,
        text_filtering: bool,
        allow_listing: bool,
    },
    PluginMessage {
        channel: String,
        data: Vec<u8>,
    },
    FinishConfigurationAck,
    KnownPacksResponse {
        packs: Vec<KnownPack>,
    },

    // === Configuration (clientbound) ===
    PluginMessageClientbound {
        channel: String,
        data: Vec<u8>,
    },
    RegistryData {
        registry_id: String,
        entries: Vec<RegistryEntry>,
    },
    UpdateTags {
        registries: Vec<TagRegistry>,
    },
    ServerLinks {
        links: Vec<ServerLink>,
    },
    FinishConfiguration,
    KnownPacksRequest {
        packs: Vec<KnownPack>,
    },

    // === Play (clientbound) ===
    SpawnEntity {
        entity_id: i32,
        entity_uuid: Uuid,
        entity_type: i32,
        x: f64,
        y: f64,
        z: f64,
        pitch: u8,
        yaw: u8,
        head_yaw: u8,
        data: i32,
        velocity_x: i16,
        velocity_y: i16,
        velocity_z: i16,
    },
    AcknowledgeBlockChange {
        sequence: i32,
    },
    BlockUpdate {
        position: BlockPos,
        block_id: i32,
    },
    ChunkBatchStart,
    ChunkBatchFinished {
        batch_size: i32,
    },
    /// Pre-serialized command graph body (node count, nodes, root index).
    Commands {
        graph: Vec<u8>,
    },
    SetContainerContent {
        window_id: u8,
        state_id: i32,
        slots: Vec<Option<ItemStack>>,
        carried_item: Option<ItemStack>,
    },
    SetContainerSlot {
        window_id: i8,
        state_id: i32,
        slot: i16,
        item: Option<ItemStack>,
    },
    UnloadChunk {
        chunk_x: i32,
        chunk_z: i32,
    },
    GameEvent {
        event: u8,
        value: f32,
    },
    InitializeWorldBorder {
        center_x: f64,
        center_z: f64,
        old_diameter: f64,
        new_diameter: f64,
        speed_ms: i64,
        portal_teleport_boundary: i32,
        warning_blocks: i32,
        warning_time: i32,
    },
    SetBorderCenter {
        center_x: f64,
        center_z: f64,
    },
    SetBorderLerpSize {
        old_diameter: f64,
        new_diameter: f64,
        speed_ms: i64,
    },
    SetBorderSize {
        diameter: f64,
    },
    SetBorderWarningDelay {
        warning_time: i32,
    },
    SetBorderWarningDistance {
        warning_blocks: i32,
    },
    KeepAliveClientbound {
        id: i64,
    },
    ChunkDataAndUpdateLight {
        chunk_x: i32,
        chunk_z: i32,
        heightmaps: NbtValue,
        data: Vec<u8>,
        block_entities: Vec<u8>,
        light_data: ChunkLightData,
    },
    JoinGame {
        entity_id: i32,
        is_hardcore: bool,
        dimension_names: Vec<String>,
        max_players: i32,
        view_distance: i32,
        simulation_distance: i32,
        reduced_debug_info: bool,
        enable_respawn_screen: bool,
        do_limited_crafting: bool,
        dimension_type: i32,
        dimension_name: String,
        hashed_seed: i64,
        game_mode: GameMode,
        previous_game_mode: i8,
        is_debug: bool,
        is_flat: bool,
        portal_cooldown: i32,
        sea_level: i32,
        enforces_secure_chat: bool,
    },
    UpdateEntityPosition {
        entity_id: i32,
        delta_x: i16,
        delta_y: i16,
        delta_z: i16,
        on_ground: bool,
    },
    UpdateEntityPositionAndRotation {
        entity_id: i32,
        delta_x: i16,
        delta_y: i16,
        delta_z: i16,
        yaw: u8,
        pitch: u8,
        on_ground: bool,
    },
    UpdateEntityRotation {
        entity_id: i32,
        yaw: u8,
        pitch: u8,
        on_ground: bool,
    },
    PlayerChat {
        sender: Uuid,
        sender_name: TextComponent,
        message: String,
        timestamp: i64,
        salt: i64,
    },
    PlayerInfoRemove {
        uuids: Vec<Uuid>,
    },
    PlayerInfoUpdate {
        actions: u8,
        players: Vec<PlayerInfoEntry>,
    },
    SynchronizePlayerPosition {
        teleport_id: i32,
        position: Vec3d,
        velocity: Vec3d,
        yaw: f32,
        pitch: f32,
        flags: i32,
    },
    RemoveEntities {
        entity_ids: Vec<i32>,
    },
    ResourcePackPush {
        uuid: Uuid,
        url: String,
        hash: String,
        forced: bool,
        prompt: Option<TextComponent>,
    },
    SetHeadRotation {
        entity_id: i32,
        head_yaw: u8,
    },
    SetCenterChunk {
        chunk_x: i32,
        chunk_z: i32,
    },
    SetDefaultSpawnPosition {
        position: BlockPos,
        angle: f32,
    },
    SetEntityMetadata {
        entity_id: i32,
        metadata: Vec<EntityMetadataEntry>,
    },
    SetEntityVelocity {
        entity_id: i32,
        velocity_x: i16,
        velocity_y: i16,
        velocity_z: i16,
    },
    SetHeldItemClientbound {
        slot: i8,
    },
    TeleportEntity {
        entity_id: i32,
        x: f64,
        y: f64,
        z: f64,
        velocity: Vec3d,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    UpdateTime {
        world_age: i64,
        time_of_day: i64,
        time_advances: bool,
    },
    SystemChatMessage {
        content: TextComponent,
        overlay: bool,
    },
    PickupItem {
        collected_entity_id: i32,
        collector_entity_id: i32,
        count: i32,
    },
    /// Minimal update-recipes body: named property sets, no stonecutter rows.
    UpdateRecipes {
        property_sets: Vec<(String, Vec<i32>)>,
    },

    // === Play (serverbound) ===
    ConfirmTeleportation {
        teleport_id: i32,
    },
    ChatCommand {
        command: String,
    },
    ChatMessage {
        message: String,
        timestamp: i64,
        salt: i64,
        signature: Option<Vec<u8>>,
        message_count: i32,
        acknowledged: [u8; 3],
    },
    PlayerSession {
        session_id: Uuid,
        expires_at: i64,
        public_key_der: Vec<u8>,
        key_signature: Vec<u8>,
    },
    ChunkBatchReceived {
        chunks_per_tick: f32,
    },
    ClientTickEnd,
    ClickContainer {
        window_id: u8,
        state_id: i32,
        slot: i16,
        button: i8,
        mode: i32,
        changed_slots: Vec<(i16, Option<ItemStack>)>,
        carried_item: Option<ItemStack>,
    },
    CloseContainer {
        window_id: u8,
    },
    KeepAliveServerbound {
        id: i64,
    },
    SetPlayerPosition {
        x: f64,
        y: f64,
        z: f64,
        flags: u8,
    },
    SetPlayerPositionAndRotation {
        x: f64,
        y: f64,
        z: f64,
        yaw: f32,
        pitch: f32,
        flags: u8,
    },
    SetPlayerRotation {
        yaw: f32,
        pitch: f32,
        flags: u8,
    },
    SetPlayerMovementFlags {
        flags: u8,
    },
    PlayerAction {
        status: i32,
        position: BlockPos,
        face: u8,
        sequence: i32,
    },
    PlayerCommandAction {
        entity_id: i32,
        action: i32,
        jump_boost: i32,
    },
    SetHeldItemServerbound {
        slot: i16,
    },
    SetCreativeModeSlot {
        slot: i16,
        item: Option<ItemStack>,
    },
    SwingArm {
        hand: i32,
    },
    UseItemOn {
        hand: i32,
        position: BlockPos,
        face: u8,
        cursor_x: f32,
        cursor_y: f32,
        cursor_z: f32,
        inside_block: bool,
        world_border_hit: bool,
        sequence: i32,
    },
    UseItem {
        hand: i32,
        sequence: i32,
        yaw: f32,
        pitch: f32,
    },

    // === Shared ===
    Disconnect {
        reason: TextComponent,
    },

    /// Unknown / unhandled packet — raw bytes preserved.
    Unknown {
        packet_id: i32,
        data: Vec<u8>,
    },
}

/// Player Info Update action bitmask flags.
pub mod player_info_actions {
    pub const ADD_PLAYER: u8 = 0x01;
    pub const INITIALIZE_CHAT: u8 = 0x02;
    pub const UPDATE_GAME_MODE: u8 = 0x04;
    pub const UPDATE_LISTED: u8 = 0x08;
    pub const UPDATE_LATENCY: u8 = 0x10;
    pub const UPDATE_DISPLAY_NAME: u8 = 0x20;
}

/// Game event codes the server emits.
pub mod game_events {
    pub const BEGIN_RAINING: u8 = 1;
    pub const END_RAINING: u8 = 2;
    pub const CHANGE_GAME_MODE: u8 = 3;
    pub const RAIN_LEVEL_CHANGE: u8 = 7;
    pub const THUNDER_LEVEL_CHANGE: u8 = 8;
    pub const START_WAITING_FOR_LEVEL_CHUNKS: u8 = 13;
}

/// A single player entry in a PlayerInfoUpdate packet.
#[derive(Debug, Clone)]
pub struct PlayerInfoEntry {
    pub uuid: Uuid,
    /// Present when ADD_PLAYER action is set.
    pub name: Option<String>,
    /// Properties (name, value, signature) — present with ADD_PLAYER.
    pub properties: Vec<(String, String, Option<String>)>,
    /// Present when UPDATE_GAME_MODE action is set.
    pub game_mode: Option<i32>,
    /// Present when UPDATE_LISTED action is set.
    pub listed: Option<bool>,
    /// Present when UPDATE_LATENCY action is set.
    pub ping: Option<i32>,
    /// Present when UPDATE_DISPLAY_NAME action is set.
    pub display_name: Option<TextComponent>,
}

/// A single entity metadata entry for SetEntityMetadata.
#[derive(Debug, Clone)]
pub struct EntityMetadataEntry {
    pub index: u8,
    pub type_id: i32,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct KnownPack {
    pub namespace: String,
    pub id: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub id: String,
    pub data: Option<NbtValue>,
}

/// One registry's worth of tags in an UpdateTags packet.
#[derive(Debug, Clone)]
pub struct TagRegistry {
    pub registry: String,
    pub tags: Vec<(String, Vec<i32>)>,
}

#[derive(Debug, Clone)]
pub struct ServerLink {
    /// Built-in label id; None means `label` carries a custom component.
    pub builtin: Option<i32>,
    pub label: Option<TextComponent>,
    pub url: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkLightData {
    pub sky_light_mask: Vec<i64>,
    pub block_light_mask: Vec<i64>,
    pub empty_sky_light_mask: Vec<i64>,
    pub empty_block_light_mask: Vec<i64>,
    pub sky_light_arrays: Vec<Vec<u8>>,
    pub block_light_arrays: Vec<Vec<u8>>,
}
