//! The 20 Hz world tick loop and the per-connection keep-alive task.

use crate::broadcast::ClientHandle;
use crate::config::WorldBorderConfig;
use crate::context::ServerContext;
use crate::entity::Entity;
use mattock_protocol::{game_events, Packet};
use mattock_types::TextComponent;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// How long an unacknowledged teleport id may linger before eviction.
pub const TELEPORT_GRACE: Duration = Duration::from_secs(60);

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const KEEP_ALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// World age and time of day, in ticks.
pub struct WorldTime {
    world_age: i64,
    time_of_day: i64,
    frozen: bool,
}

impl Default for WorldTime {
    fn default() -> Self {
        Self {
            world_age: 0,
            time_of_day: 0,
            frozen: false,
        }
    }
}

impl WorldTime {
    pub fn advance_tick(&mut self) {
        self.world_age += 1;
    }

    /// Once per second: the day cycle moves 20 ticks unless frozen.
    pub fn advance_second(&mut self) {
        if !self.frozen {
            self.time_of_day = (self.time_of_day + 20) % 24000;
        }
    }

    pub fn world_age(&self) -> i64 {
        self.world_age
    }

    pub fn time_of_day(&self) -> i64 {
        self.time_of_day
    }

    /// Negative values store their magnitude and freeze the cycle;
    /// non-negative values resume it, wrapped to a day.
    pub fn set_time_of_day(&mut self, value: i64) {
        if value < 0 {
            self.time_of_day = value.abs();
            self.frozen = true;
        } else {
            self.time_of_day = value % 24000;
            self.frozen = false;
        }
    }

    pub fn add_time(&mut self, delta: i64) {
        let next = (self.time_of_day + delta).rem_euclid(24000);
        self.time_of_day = next;
    }

    pub fn update_packet(&self) -> Packet {
        Packet::UpdateTime {
            world_age: self.world_age,
            time_of_day: self.time_of_day,
            time_advances: !self.frozen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeatherType {
    Clear,
    Rain,
    Thunder,
}

const CLEAR_MIN_DURATION: i32 = 12000;
const CLEAR_MAX_DURATION: i32 = 180000;
const RAIN_MIN_DURATION: i32 = 12000;
const RAIN_MAX_DURATION: i32 = 24000;
const THUNDER_MIN_DURATION: i32 = 3600;
const THUNDER_MAX_DURATION: i32 = 15600;
/// 5 seconds of smooth rain/thunder level transition.
const TRANSITION_TICKS: i32 = 100;

/// Natural weather cycle with lerped rain and thunder levels.
pub struct Weather {
    raining: bool,
    thundering: bool,
    rain_counter: i32,
    thunder_counter: i32,
    rain_level: f32,
    rain_target: f32,
    rain_ticks_remaining: i32,
    thunder_level: f32,
    thunder_target: f32,
    thunder_ticks_remaining: i32,
}

impl Default for Weather {
    fn default() -> Self {
        let mut rng = rand::thread_rng();
        Self {
            raining: false,
            thundering: false,
            rain_counter: rng.gen_range(RAIN_MIN_DURATION..=RAIN_MAX_DURATION),
            thunder_counter: rng.gen_range(THUNDER_MIN_DURATION..=THUNDER_MAX_DURATION),
            rain_level: 0.0,
            rain_target: 0.0,
            rain_ticks_remaining: 0,
            thunder_level: 0.0,
            thunder_target: 0.0,
            thunder_ticks_remaining: 0,
        }
    }
}

impl Weather {
    pub fn current(&self) -> WeatherType {
        if self.thundering {
            WeatherType::Thunder
        } else if self.raining {
            WeatherType::Rain
        } else {
            WeatherType::Clear
        }
    }

    /// Force a weather state, as `/weather` does. Zero duration picks a
    /// random one.
    pub fn set_weather(&mut self, weather: WeatherType, duration_ticks: i32) -> Vec<Packet> {
        let mut rng = rand::thread_rng();
        let mut packets = Vec::new();
        match weather {
            WeatherType::Clear => {
                if self.raining {
                    packets.push(Packet::GameEvent {
                        event: game_events::END_RAINING,
                        value: 0.0,
                    });
                }
                self.raining = false;
                self.thundering = false;
                self.begin_rain_lerp(0.0);
                self.begin_thunder_lerp(0.0);
                self.rain_counter = if duration_ticks > 0 {
                    duration_ticks
                } else {
                    rng.gen_range(CLEAR_MIN_DURATION..=CLEAR_MAX_DURATION)
                };
            }
            WeatherType::Rain => {
                if !self.raining {
                    packets.push(Packet::GameEvent {
                        event: game_events::BEGIN_RAINING,
                        value: 0.0,
                    });
                }
                self.raining = true;
                self.thundering = false;
                self.begin_rain_lerp(1.0);
                self.begin_thunder_lerp(0.0);
                self.rain_counter = if duration_ticks > 0 {
                    duration_ticks
                } else {
                    rng.gen_range(RAIN_MIN_DURATION..=RAIN_MAX_DURATION)
                };
            }
            WeatherType::Thunder => {
                if !self.raining {
                    packets.push(Packet::GameEvent {
                        event: game_events::BEGIN_RAINING,
                        value: 0.0,
                    });
                }
                self.raining = true;
                self.thundering = true;
                self.begin_rain_lerp(1.0);
                self.begin_thunder_lerp(1.0);
                let duration = if duration_ticks > 0 {
                    duration_ticks
                } else {
                    rng.gen_range(THUNDER_MIN_DURATION..=THUNDER_MAX_DURATION)
                };
                self.rain_counter = duration;
                self.thunder_counter = duration;
            }
        }
        packets
    }

    fn begin_rain_lerp(&mut self, target: f32) {
        self.rain_target = target;
        self.rain_ticks_remaining = TRANSITION_TICKS;
    }

    fn begin_thunder_lerp(&mut self, target: f32) {
        self.thunder_target = target;
        self.thunder_ticks_remaining = TRANSITION_TICKS;
    }

    /// One tick of the natural cycle. Returned packets go to every client.
    pub fn handle_tick(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();

        self.rain_counter -= 1;
        if self.rain_counter <= 0 {
            let next = if self.raining {
                WeatherType::Clear
            } else {
                WeatherType::Rain
            };
            packets.extend(self.set_weather(next, 0));
        }
        if self.raining {
            self.thunder_counter -= 1;
            if self.thunder_counter <= 0 {
                let mut rng = rand::thread_rng();
                self.thundering = !self.thundering;
                self.begin_thunder_lerp(if self.thundering { 1.0 } else { 0.0 });
                self.thunder_counter = rng.gen_range(THUNDER_MIN_DURATION..=THUNDER_MAX_DURATION);
            }
        }

        packets.extend(self.handle_lerping());
        packets
    }

    fn handle_lerping(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        if self.rain_ticks_remaining > 0 {
            let step = (self.rain_target - self.rain_level) / self.rain_ticks_remaining as f32;
            self.rain_level += step;
            self.rain_ticks_remaining -= 1;
            packets.push(Packet::GameEvent {
                event: game_events::RAIN_LEVEL_CHANGE,
                value: self.rain_level,
            });
        }
        if self.thunder_ticks_remaining > 0 {
            let step =
                (self.thunder_target - self.thunder_level) / self.thunder_ticks_remaining as f32;
            self.thunder_level += step;
            self.thunder_ticks_remaining -= 1;
            packets.push(Packet::GameEvent {
                event: game_events::THUNDER_LEVEL_CHANGE,
                value: self.thunder_level,
            });
        }
        packets
    }
}

/// An in-flight border resize.
struct ActiveResize {
    from: f64,
    target: f64,
    duration_ms: u64,
    elapsed_ms: u64,
}

pub struct WorldBorder {
    pub center_x: f64,
    pub center_z: f64,
    pub size: f64,
    pub warning_time: i32,
    pub warning_blocks: i32,
    pub portal_teleport_boundary: f64,
    resize: Option<ActiveResize>,
}

impl WorldBorder {
    pub fn from_config(config: &WorldBorderConfig) -> Self {
        let mut border = Self {
            center_x: config.center[0],
            center_z: config.center[1],
            size: config.size,
            warning_time: config.warning_time,
            warning_blocks: config.warning_blocks,
            portal_teleport_boundary: 0.0,
            resize: None,
        };
        border.recalculate_boundary();
        border
    }

    fn recalculate_boundary(&mut self) {
        self.portal_teleport_boundary = (self.size / 2.0).max(0.0);
    }

    pub fn set_size(&mut self, size: f64) -> Packet {
        self.size = size;
        self.resize = None;
        self.recalculate_boundary();
        Packet::SetBorderSize { diameter: size }
    }

    pub fn set_center(&mut self, x: f64, z: f64) -> Packet {
        self.center_x = x;
        self.center_z = z;
        Packet::SetBorderCenter {
            center_x: x,
            center_z: z,
        }
    }

    pub fn set_warning_time(&mut self, seconds: i32) -> Packet {
        self.warning_time = seconds;
        Packet::SetBorderWarningDelay {
            warning_time: seconds,
        }
    }

    pub fn set_warning_blocks(&mut self, blocks: i32) -> Packet {
        self.warning_blocks = blocks;
        Packet::SetBorderWarningDistance {
            warning_blocks: blocks,
        }
    }

    /// Start a linear resize to `target` over `duration_ms`.
    pub fn begin_resize(&mut self, target: f64, duration_ms: u64) -> Packet {
        let packet = Packet::SetBorderLerpSize {
            old_diameter: self.size,
            new_diameter: target,
            speed_ms: duration_ms as i64,
        };
        if duration_ms == 0 {
            return self.set_size(target);
        }
        self.resize = Some(ActiveResize {
            from: self.size,
            target,
            duration_ms,
            elapsed_ms: 0,
        });
        packet
    }

    /// Advance the active resize, if any.
    pub fn tick(&mut self, elapsed_ms: u64) {
        if let Some(resize) = self.resize.as_mut() {
            resize.elapsed_ms += elapsed_ms;
            if resize.elapsed_ms >= resize.duration_ms {
                self.size = resize.target;
                self.resize = None;
            } else {
                let t = resize.elapsed_ms as f64 / resize.duration_ms as f64;
                self.size = resize.from + (resize.target - resize.from) * t;
            }
            self.recalculate_boundary();
        }
    }

    pub fn init_packet(&self) -> Packet {
        let (old, new, speed) = match self.resize.as_ref() {
            Some(resize) => (
                self.size,
                resize.target,
                (resize.duration_ms - resize.elapsed_ms) as i64,
            ),
            None => (self.size, self.size, 0),
        };
        Packet::InitializeWorldBorder {
            center_x: self.center_x,
            center_z: self.center_z,
            old_diameter: old,
            new_diameter: new,
            speed_ms: speed,
            portal_teleport_boundary: self.portal_teleport_boundary as i32,
            warning_blocks: self.warning_blocks,
            warning_time: self.warning_time,
        }
    }
}

/// Run the world tick loop until shutdown.
pub async fn run_tick_loop(
    ctx: Arc<ServerContext>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) {
    let tick_ms = 1000 / ctx.config.ticks_per_second.max(1) as u64;
    let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut tick_count: u64 = 0;

    info!("tick loop running at {} Hz", ctx.config.ticks_per_second);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("tick loop stopping");
                    return;
                }
            }
        }
        tick_count += 1;

        {
            let mut time = ctx.time.lock().unwrap();
            time.advance_tick();
        }
        if tick_count % 20 == 0 {
            let packet = {
                let mut time = ctx.time.lock().unwrap();
                time.advance_second();
                time.update_packet()
            };
            ctx.clients.broadcast(&packet, None).await;
        }

        let weather_packets = {
            let mut weather = ctx.weather.lock().unwrap();
            weather.handle_tick()
        };
        for packet in weather_packets {
            ctx.clients.broadcast(&packet, None).await;
        }

        {
            let mut border = ctx.border.lock().unwrap();
            border.tick(tick_ms);
        }

        // Item entity motion and pickup.
        for entity in ctx.entities.get_all() {
            if let Entity::Item(item) = entity {
                item.tick_motion();
                if item.can_be_picked_up() {
                    try_pickup(&ctx, &item).await;
                }
            }
        }

        // Teleport ids that never got confirmed are dropped after a grace
        // window so they cannot pin the awaiting state forever.
        if tick_count % 20 == 0 {
            let players: Vec<_> = ctx.players.lock().unwrap().values().cloned().collect();
            for player in players {
                let evicted = player.evict_stale_teleports(TELEPORT_GRACE);
                if evicted > 0 {
                    debug!("evicted {evicted} stale teleport ids for {}", player.name);
                }
            }
        }
    }
}

/// Hand an eligible item entity to the first player close enough to
/// collect it.
async fn try_pickup(ctx: &Arc<ServerContext>, item: &Arc<crate::entity::ItemEntity>) {
    let item_pos = *item.position.lock().unwrap();
    let collector = ctx.players.lock().unwrap().values().cloned().find(|player| {
        let p = player.position();
        (p.x - item_pos.x).abs() < 1.0
            && (p.y - item_pos.y).abs() < 1.75
            && (p.z - item_pos.z).abs() < 1.0
    });
    let Some(player) = collector else {
        return;
    };

    let Some((state_id, content, carried)) = ({
        let mut inventory = player.inventory.lock().unwrap();
        // Only whole-stack pickups; otherwise the item stays on the ground.
        if inventory.can_accept(item.item) {
            let leftover = inventory.add_item(item.item);
            debug_assert!(leftover.is_empty());
            Some((
                inventory.next_state_id(),
                inventory.content_snapshot(),
                inventory.carried.to_wire(),
            ))
        } else {
            None
        }
    }) else {
        return;
    };
    if ctx.entities.remove(&item.uuid).is_none() {
        return;
    }

    ctx.clients
        .broadcast(
            &Packet::PickupItem {
                collected_entity_id: item.entity_id,
                collector_entity_id: player.entity_id,
                count: item.item.count as i32,
            },
            None,
        )
        .await;
    ctx.clients
        .broadcast(
            &Packet::RemoveEntities {
                entity_ids: vec![item.entity_id],
            },
            None,
        )
        .await;
    player
        .client
        .send(&Packet::SetContainerContent {
            window_id: 0,
            state_id,
            slots: content,
            carried_item: carried,
        })
        .await;
}

/// Per-connection keep-alive: a fresh id every 15 s; 30 s without an echo
/// disconnects the client.
pub async fn run_keep_alive(client: Arc<ClientHandle>) {
    let mut interval = tokio::time::interval(KEEP_ALIVE_INTERVAL);
    interval.tick().await; // first tick fires immediately
    loop {
        interval.tick().await;
        if client.is_closed() {
            return;
        }
        let last_ack = *client.last_keep_alive_ack.lock().unwrap();
        if last_ack.elapsed() > KEEP_ALIVE_TIMEOUT {
            client
                .send(&Packet::Disconnect {
                    reason: TextComponent::plain("Timed out"),
                })
                .await;
            client.close();
            return;
        }
        let id = client
            .keep_alive_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed)
            + 1;
        client.send(&Packet::KeepAliveClientbound { id }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_advances_and_wraps() {
        let mut time = WorldTime::default();
        for _ in 0..20 {
            time.advance_tick();
        }
        time.advance_second();
        assert_eq!(time.world_age(), 20);
        assert_eq!(time.time_of_day(), 20);

        time.set_time_of_day(23990);
        time.advance_second();
        assert_eq!(time.time_of_day(), 10);
    }

    #[test]
    fn test_negative_time_freezes() {
        let mut time = WorldTime::default();
        time.set_time_of_day(-6000);
        assert_eq!(time.time_of_day(), 6000);
        time.advance_second();
        assert_eq!(time.time_of_day(), 6000, "frozen cycle does not advance");
        match time.update_packet() {
            Packet::UpdateTime { time_advances, .. } => assert!(!time_advances),
            _ => unreachable!(),
        }

        time.set_time_of_day(1000);
        time.advance_second();
        assert_eq!(time.time_of_day(), 1020);
    }

    #[test]
    fn test_set_time_wraps_mod_day() {
        let mut time = WorldTime::default();
        time.set_time_of_day(24000 + 500);
        assert_eq!(time.time_of_day(), 500);
    }

    #[test]
    fn test_weather_lerp_reaches_target() {
        let mut weather = Weather::default();
        let start_packets = weather.set_weather(WeatherType::Rain, 1000);
        assert!(start_packets
            .iter()
            .any(|p| matches!(p, Packet::GameEvent { event, .. } if *event == game_events::BEGIN_RAINING)));
        for _ in 0..TRANSITION_TICKS + 1 {
            weather.handle_tick();
        }
        assert!((weather.rain_level - 1.0).abs() < 1e-4);
        assert_eq!(weather.current(), WeatherType::Rain);
    }

    #[test]
    fn test_border_resize_lerps_linearly() {
        let config = WorldBorderConfig {
            size: 100.0,
            center: [0.0, 0.0],
            warning_time: 15,
            warning_blocks: 5,
        };
        let mut border = WorldBorder::from_config(&config);
        assert_eq!(border.portal_teleport_boundary, 50.0);

        border.begin_resize(200.0, 1000);
        border.tick(500);
        assert!((border.size - 150.0).abs() < 1e-9);
        border.tick(500);
        assert!((border.size - 200.0).abs() < 1e-9);
        assert_eq!(border.portal_teleport_boundary, 100.0);
        // Resize finished; further ticks hold.
        border.tick(500);
        assert!((border.size - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_border_zero_duration_is_instant() {
        let mut border = WorldBorder::from_config(&WorldBorderConfig::default());
        match border.begin_resize(64.0, 0) {
            Packet::SetBorderSize { diameter } => assert_eq!(diameter, 64.0),
            other => panic!("expected instant set, got {other:?}"),
        }
        assert_eq!(border.size, 64.0);
    }
}
