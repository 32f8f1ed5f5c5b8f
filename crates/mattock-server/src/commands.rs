//! The built-in command tree and its handlers.

use crate::context::ServerContext;
use crate::tick::WeatherType;
use mattock_command::graph::parsers;
use mattock_command::{CommandBuilder, CommandGraph};
use mattock_inventory::{items, Slot};
use mattock_protocol::{game_events, player_info_actions, Packet, PlayerInfoEntry};
use mattock_types::{GameMode, TextComponent, Vec3d};

/// Build the whole command graph. Handlers receive the server context and
/// feed results through the caller's output sink.
pub fn build_commands() -> CommandGraph<ServerContext> {
    let mut builder: CommandBuilder<ServerContext> = CommandBuilder::new();

    build_time(&mut builder);
    build_weather(&mut builder);
    build_gamemode(&mut builder);
    build_say(&mut builder);
    build_tp(&mut builder);
    build_worldborder(&mut builder);
    build_give(&mut builder);

    builder.build()
}

fn set_time(ctx: &ServerContext, value: i64) {
    let packet = {
        let mut time = ctx.time.lock().unwrap();
        time.set_time_of_day(value);
        time.update_packet()
    };
    ctx.queue_broadcast(packet);
}

fn build_time(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("time")
        .literal_exec("set", true, true)
        .argument_exec("time", parsers::TIME, true, true)
        .int_range(0, 0)
        .handler(|ctx, _invoker, args, output| {
            let value: i64 = args[0].parse().unwrap_or(0);
            set_time(ctx, value);
            output("commands.time.set", false, &[value.to_string()]);
        })
        .end()
        .literal_exec("day", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_time(ctx, 1000);
            output("commands.time.set", false, &["1000".to_string()]);
        })
        .end()
        .literal_exec("noon", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_time(ctx, 6000);
            output("commands.time.set", false, &["6000".to_string()]);
        })
        .end()
        .literal_exec("night", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_time(ctx, 13000);
            output("commands.time.set", false, &["13000".to_string()]);
        })
        .end()
        .literal_exec("midnight", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_time(ctx, 18000);
            output("commands.time.set", false, &["18000".to_string()]);
        })
        .end()
        .end() // set
        .literal_exec("add", true, true)
        .argument_exec("time", parsers::TIME, true, true)
        .int_range(0, 0)
        .handler(|ctx, _invoker, args, output| {
            let delta: i64 = args[0].parse().unwrap_or(0);
            let packet = {
                let mut time = ctx.time.lock().unwrap();
                time.add_time(delta);
                time.update_packet()
            };
            ctx.queue_broadcast(packet);
            let now = ctx.time.lock().unwrap().time_of_day();
            output("commands.time.set", false, &[now.to_string()]);
        })
        .end()
        .end() // add
        .literal_exec("query", true, true)
        .literal_exec("daytime", true, true)
        .handler(|ctx, _invoker, _args, output| {
            let value = ctx.time.lock().unwrap().time_of_day();
            output("commands.time.query", false, &[value.to_string()]);
        })
        .end()
        .literal_exec("gametime", true, true)
        .handler(|ctx, _invoker, _args, output| {
            let value = ctx.time.lock().unwrap().world_age();
            output("commands.time.query", false, &[value.to_string()]);
        })
        .end()
        .literal_exec("day", true, true)
        .handler(|ctx, _invoker, _args, output| {
            let value = ctx.time.lock().unwrap().time_of_day() / 24000;
            output("commands.time.query", false, &[value.to_string()]);
        })
        .end()
        .end() // query
        .end(); // time
}

fn set_weather(ctx: &ServerContext, weather: WeatherType, duration: i32, output: &mut dyn FnMut(&str, bool, &[String]), key: &str) {
    let packets = {
        let mut state = ctx.weather.lock().unwrap();
        state.set_weather(weather, duration)
    };
    for packet in packets {
        ctx.queue_broadcast(packet);
    }
    output(key, false, &[]);
}

fn build_weather(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("weather")
        .literal_exec("clear", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_weather(ctx, WeatherType::Clear, 0, output, "commands.weather.set.clear");
        })
        .argument_exec("duration", parsers::TIME, true, true)
        .int_range(0, 0)
        .handler(|ctx, _invoker, args, output| {
            let duration: i32 = args[0].parse().unwrap_or(0);
            set_weather(ctx, WeatherType::Clear, duration, output, "commands.weather.set.clear");
        })
        .end()
        .end()
        .literal_exec("rain", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_weather(ctx, WeatherType::Rain, 0, output, "commands.weather.set.rain");
        })
        .argument_exec("duration", parsers::TIME, true, true)
        .int_range(0, 0)
        .handler(|ctx, _invoker, args, output| {
            let duration: i32 = args[0].parse().unwrap_or(0);
            set_weather(ctx, WeatherType::Rain, duration, output, "commands.weather.set.rain");
        })
        .end()
        .end()
        .literal_exec("thunder", true, true)
        .handler(|ctx, _invoker, _args, output| {
            set_weather(ctx, WeatherType::Thunder, 0, output, "commands.weather.set.thunder");
        })
        .argument_exec("duration", parsers::TIME, true, true)
        .int_range(0, 0)
        .handler(|ctx, _invoker, args, output| {
            let duration: i32 = args[0].parse().unwrap_or(0);
            set_weather(ctx, WeatherType::Thunder, duration, output, "commands.weather.set.thunder");
        })
        .end()
        .end()
        .end();
}

fn apply_gamemode(ctx: &ServerContext, target: &str, mode: GameMode, output: &mut dyn FnMut(&str, bool, &[String])) {
    let Some(player) = ctx.get_player_by_name(target) else {
        output("argument.entity.notfound.player", true, &[]);
        return;
    };
    *player.game_mode.lock().unwrap() = mode;
    ctx.queue_send(
        &player,
        Packet::GameEvent {
            event: game_events::CHANGE_GAME_MODE,
            value: mode.id() as f32,
        },
    );
    ctx.queue_broadcast(Packet::PlayerInfoUpdate {
        actions: player_info_actions::UPDATE_GAME_MODE,
        players: vec![PlayerInfoEntry {
            uuid: player.uuid,
            name: None,
            properties: Vec::new(),
            game_mode: Some(mode.id() as i32),
            listed: None,
            ping: None,
            display_name: None,
        }],
    });
    output("commands.gamemode.success.other", false, &[target.to_string()]);
}

fn build_gamemode(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("gamemode")
        .argument_exec("mode", parsers::GAMEMODE, true, false)
        .handler(|ctx, invoker, args, output| {
            let Some(mode) = GameMode::from_name(&args[0]) else {
                output("commands.gamemode.invalid", true, &[]);
                return;
            };
            apply_gamemode(ctx, invoker.name(), mode, output);
        })
        .argument_exec("player", parsers::ENTITY, true, true)
        .entity_properties(true, true)
        .handler(|ctx, _invoker, args, output| {
            let Some(mode) = GameMode::from_name(&args[0]) else {
                output("commands.gamemode.invalid", true, &[]);
                return;
            };
            apply_gamemode(ctx, &args[1], mode, output);
        })
        .end()
        .end()
        .end();
}

fn build_say(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("say")
        .argument_exec("message", parsers::STRING, true, true)
        .handler(|ctx, invoker, args, _output| {
            let text = format!("[{}] {}", invoker.name(), args.join(" "));
            ctx.queue_broadcast(Packet::SystemChatMessage {
                content: TextComponent::plain(text),
                overlay: false,
            });
        })
        .end()
        .end();
}

fn build_tp(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("tp")
        .argument_exec("pos", parsers::VEC2, true, false)
        .handler(|ctx, invoker, args, output| {
            let Some((x, z)) = args[0].split_once(',') else {
                output("commands.tp.invalid", true, &[]);
                return;
            };
            let (Ok(x), Ok(z)) = (x.parse::<f64>(), z.parse::<f64>()) else {
                output("commands.tp.invalid", true, &[]);
                return;
            };
            let Some(player) = ctx.get_player_by_name(invoker.name()) else {
                output("argument.entity.notfound.player", true, &[]);
                return;
            };
            let y = player.position().y;
            let destination = Vec3d::new(x, y, z);
            player.set_position(destination);
            let teleport_id = ctx.next_teleport_id();
            player.begin_teleport(teleport_id);
            ctx.queue_send(
                &player,
                Packet::SynchronizePlayerPosition {
                    teleport_id,
                    position: destination,
                    velocity: Vec3d::new(0.0, 0.0, 0.0),
                    yaw: 0.0,
                    pitch: 0.0,
                    flags: 0,
                },
            );
            output(
                "commands.teleport.success.location.single",
                false,
                &[format!("{x}"), format!("{z}")],
            );
        })
        .end()
        .end();
}

fn build_worldborder(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("worldborder")
        .literal_exec("set", true, true)
        .argument_exec("distance", parsers::DOUBLE, true, true)
        .double_range(-59999968.0, 59999968.0)
        .handler(|ctx, _invoker, args, output| {
            let distance: f64 = args[0].parse().unwrap_or(0.0);
            let packet = ctx.border.lock().unwrap().set_size(distance);
            ctx.queue_broadcast(packet);
            output("commands.worldborder.set.immediate", false, &[args[0].clone()]);
        })
        .argument_exec("time", parsers::INTEGER, true, true)
        .int_range(0, 2147483647)
        .handler(|ctx, _invoker, args, output| {
            let distance: f64 = args[0].parse().unwrap_or(0.0);
            let seconds: u64 = args[1].parse().unwrap_or(0);
            let packet = ctx
                .border
                .lock()
                .unwrap()
                .begin_resize(distance, seconds * 1000);
            ctx.queue_broadcast(packet);
            output("commands.worldborder.set.grow", false, &[args[0].clone(), args[1].clone()]);
        })
        .end()
        .end()
        .end() // set
        .literal_exec("add", true, true)
        .argument_exec("distance", parsers::DOUBLE, true, true)
        .double_range(-59999968.0, 59999968.0)
        .handler(|ctx, _invoker, args, output| {
            let delta: f64 = args[0].parse().unwrap_or(0.0);
            let packet = {
                let mut border = ctx.border.lock().unwrap();
                let target = border.size + delta;
                border.set_size(target)
            };
            ctx.queue_broadcast(packet);
            output("commands.worldborder.set.immediate", false, &[args[0].clone()]);
        })
        .end()
        .end() // add
        .literal_exec("center", true, true)
        .argument_exec("pos", parsers::VEC2, true, true)
        .handler(|ctx, _invoker, args, output| {
            let Some((x, z)) = args[0].split_once(',') else {
                output("commands.worldborder.center.failed", true, &[]);
                return;
            };
            let (Ok(x), Ok(z)) = (x.parse::<f64>(), z.parse::<f64>()) else {
                output("commands.worldborder.center.failed", true, &[]);
                return;
            };
            let packet = ctx.border.lock().unwrap().set_center(x, z);
            ctx.queue_broadcast(packet);
            output("commands.worldborder.center.success", false, &[]);
        })
        .end()
        .end() // center
        .literal_exec("warning", true, true)
        .literal_exec("distance", true, true)
        .argument_exec("distance", parsers::INTEGER, true, true)
        .int_range(0, 2147483647)
        .handler(|ctx, _invoker, args, output| {
            let blocks: i32 = args[0].parse().unwrap_or(0);
            let packet = ctx.border.lock().unwrap().set_warning_blocks(blocks);
            ctx.queue_broadcast(packet);
            output("commands.worldborder.warning.distance.success", false, &[]);
        })
        .end()
        .end()
        .literal_exec("time", true, true)
        .argument_exec("time", parsers::INTEGER, true, true)
        .int_range(0, 2147483647)
        .handler(|ctx, _invoker, args, output| {
            let seconds: i32 = args[0].parse().unwrap_or(0);
            let packet = ctx.border.lock().unwrap().set_warning_time(seconds);
            ctx.queue_broadcast(packet);
            output("commands.worldborder.warning.time.success", false, &[]);
        })
        .end()
        .end()
        .end() // warning
        .literal_exec("get", true, true)
        .handler(|ctx, _invoker, _args, output| {
            let size = ctx.border.lock().unwrap().size;
            output("commands.worldborder.get", false, &[format!("{size}")]);
        })
        .end()
        .end(); // worldborder
}

/// Item names the give command understands.
fn item_by_name(name: &str) -> Option<i32> {
    let bare = name.strip_prefix("minecraft:").unwrap_or(name);
    match bare {
        "oak_log" => Some(items::OAK_LOG),
        "oak_planks" => Some(items::OAK_PLANKS),
        "stick" => Some(items::STICK),
        "crafting_table" => Some(items::CRAFTING_TABLE),
        "coal" => Some(items::COAL),
        "torch" => Some(items::TORCH),
        _ => bare.parse().ok(),
    }
}

fn build_give(builder: &mut CommandBuilder<ServerContext>) {
    builder
        .literal("give")
        .argument("player", parsers::ENTITY)
        .entity_properties(true, true)
        .argument_exec("item", parsers::RESOURCE, true, true)
        .handler(|ctx, _invoker, args, output| give_handler(ctx, args, output))
        .argument_exec("count", parsers::INTEGER, true, true)
        .int_range(0, 99)
        .handler(|ctx, _invoker, args, output| give_handler(ctx, args, output))
        .end()
        .end()
        .end()
        .end();
}

/// Shared by the with-count and without-count forms of /give.
fn give_handler(ctx: &ServerContext, args: &[String], output: &mut dyn FnMut(&str, bool, &[String])) {
    let target = &args[0];
    let Some(item_id) = item_by_name(&args[1]) else {
        output("argument.item.id.invalid", true, &[args[1].clone()]);
        return;
    };
    let count: i8 = args.get(2).and_then(|c| c.parse().ok()).unwrap_or(1);
    let Some(player) = ctx.get_player_by_name(target) else {
        output("argument.entity.notfound.player", true, &[]);
        return;
    };

    let (state_id, content, carried) = {
        let mut inventory = player.inventory.lock().unwrap();
        // First empty hotbar slot, then main storage.
        let target_slot = (36..=44)
            .chain(9..=35)
            .find(|&slot| inventory.slot(slot).is_empty());
        if let Some(slot) = target_slot {
            inventory.set_slot(slot, Slot::new(item_id, count));
        }
        (
            inventory.next_state_id(),
            inventory.content_snapshot(),
            inventory.carried.to_wire(),
        )
    };
    ctx.queue_send(
        &player,
        Packet::SetContainerContent {
            window_id: 0,
            state_id,
            slots: content,
            carried_item: carried,
        },
    );
    output("commands.give.success.single", false, &[count.to_string(), args[1].clone(), target.clone()]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mattock_command::wire;

    #[test]
    fn test_graph_serializes() {
        let graph = build_commands();
        let data = wire::serialize(&graph);
        assert!(!data.is_empty());
        // The graph must survive its own wire encoding.
        let parsed = wire::deserialize(&data).unwrap();
        assert_eq!(parsed.nodes.len(), graph.nodes.len());
    }

    #[test]
    fn test_item_by_name() {
        assert_eq!(item_by_name("minecraft:stick"), Some(items::STICK));
        assert_eq!(item_by_name("stick"), Some(items::STICK));
        assert_eq!(item_by_name("42"), Some(42));
        assert_eq!(item_by_name("nonsense"), None);
    }
}
