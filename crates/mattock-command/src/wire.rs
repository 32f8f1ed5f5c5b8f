//! Byte-exact serialization of the command graph for the Commands packet,
//! plus a deserializer used to validate the encoding.

use crate::graph::{parsers, ArgRange, CommandGraph, CommandNode, NodeKind};
use bytes::{Buf, BufMut, BytesMut};
use mattock_protocol::{read_string, read_varint, write_string, write_varint};
use std::collections::HashMap;

const FLAG_LITERAL: u8 = 0x01;
const FLAG_ARGUMENT: u8 = 0x02;
const FLAG_EXECUTABLE: u8 = 0x04;
const FLAG_REDIRECT: u8 = 0x08;
const FLAG_SUGGESTIONS: u8 = 0x10;

/// Serialize the graph: breadth-first flatten, then
/// `count, node*, root_index`. Returns the complete packet body.
pub fn serialize<C>(graph: &CommandGraph<C>) -> Vec<u8> {
    // BFS assigns wire indices.
    let mut order: Vec<usize> = Vec::with_capacity(graph.nodes.len());
    let mut wire_index: HashMap<usize, usize> = HashMap::new();
    let mut queue = std::collections::VecDeque::from([graph.root()]);
    while let Some(current) = queue.pop_front() {
        if wire_index.contains_key(&current) {
            continue;
        }
        wire_index.insert(current, order.len());
        order.push(current);
        for &child in &graph.nodes[current].children {
            queue.push_back(child);
        }
        if let Some(target) = graph.nodes[current].redirect {
            queue.push_back(target);
        }
    }

    let mut buf = BytesMut::new();
    write_varint(&mut buf, order.len() as i32);
    for &arena_idx in &order {
        serialize_node(&mut buf, &graph.nodes[arena_idx], &wire_index);
    }
    write_varint(&mut buf, wire_index[&graph.root()] as i32);
    buf.to_vec()
}

fn serialize_node<C>(buf: &mut BytesMut, node: &CommandNode<C>, wire_index: &HashMap<usize, usize>) {
    let mut flags = match node.kind {
        NodeKind::Root => 0x00,
        NodeKind::Literal(_) => FLAG_LITERAL,
        NodeKind::Argument { .. } => FLAG_ARGUMENT,
    };
    if node.executable {
        flags |= FLAG_EXECUTABLE;
    }
    if node.redirect.is_some() {
        flags |= FLAG_REDIRECT;
    }
    if node.suggestions.is_some() {
        flags |= FLAG_SUGGESTIONS;
    }
    buf.put_u8(flags);

    write_varint(buf, node.children.len() as i32);
    for child in &node.children {
        write_varint(buf, wire_index[child] as i32);
    }

    if let Some(target) = node.redirect {
        write_varint(buf, wire_index[&target] as i32);
    }

    match &node.kind {
        NodeKind::Root => {}
        NodeKind::Literal(name) => write_string(buf, name),
        NodeKind::Argument { name, parser } => {
            write_string(buf, name);
            write_varint(buf, *parser);
            serialize_parser_properties(buf, *parser, node);
        }
    }

    if let Some(ref id) = node.suggestions {
        write_string(buf, id);
    }
}

fn serialize_parser_properties<C>(buf: &mut BytesMut, parser: i32, node: &CommandNode<C>) {
    match parser {
        parsers::FLOAT => {
            let (min, max) = match node.range {
                ArgRange::Float { min, max } => (min, max),
                _ => (0.0, 0.0),
            };
            let mut flags = 0u8;
            if min != 0.0 {
                flags |= 0x01;
            }
            if max != 0.0 {
                flags |= 0x02;
            }
            buf.put_u8(flags);
            if flags & 0x01 != 0 {
                buf.put_f32(min);
            }
            if flags & 0x02 != 0 {
                buf.put_f32(max);
            }
        }
        parsers::DOUBLE => {
            let (min, max) = match node.range {
                ArgRange::Double { min, max } => (min, max),
                _ => (0.0, 0.0),
            };
            let mut flags = 0u8;
            if min != 0.0 {
                flags |= 0x01;
            }
            if max != 0.0 {
                flags |= 0x02;
            }
            buf.put_u8(flags);
            if flags & 0x01 != 0 {
                buf.put_f64(min);
            }
            if flags & 0x02 != 0 {
                buf.put_f64(max);
            }
        }
        parsers::INTEGER => {
            let (min, max) = match node.range {
                ArgRange::Int { min, max } => (min, max),
                _ => (0, 0),
            };
            let mut flags = 0u8;
            if min != 0 {
                flags |= 0x01;
            }
            if max != 0 {
                flags |= 0x02;
            }
            buf.put_u8(flags);
            if flags & 0x01 != 0 {
                buf.put_i32(min);
            }
            if flags & 0x02 != 0 {
                buf.put_i32(max);
            }
        }
        parsers::ENTITY => {
            buf.put_u8(node.entity_properties);
        }
        parsers::TIME => {
            let min = match node.range {
                ArgRange::Int { min, .. } => min,
                _ => 0,
            };
            buf.put_i32(min);
        }
        // minecraft:resource and the rest carry no properties here.
        _ => {}
    }
}

/// Deserialize a serialized graph back into a handler-less graph. Supports
/// every construct `serialize` can emit; used to check the encoding laws.
pub fn deserialize(data: &[u8]) -> Result<CommandGraph<()>, String> {
    let mut buf = BytesMut::from(data);
    let count = read_varint(&mut buf).map_err(|e| e.to_string())? as usize;

    struct RawNode {
        flags: u8,
        children: Vec<usize>,
        redirect: Option<usize>,
        name: Option<String>,
        parser: Option<i32>,
        range: ArgRange,
        entity_properties: u8,
        suggestions: Option<String>,
    }

    let mut raw_nodes = Vec::with_capacity(count);
    for _ in 0..count {
        if !buf.has_remaining() {
            return Err("truncated node list".into());
        }
        let flags = buf.get_u8();
        let child_count = read_varint(&mut buf).map_err(|e| e.to_string())? as usize;
        let mut children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            children.push(read_varint(&mut buf).map_err(|e| e.to_string())? as usize);
        }
        let redirect = if flags & FLAG_REDIRECT != 0 {
            Some(read_varint(&mut buf).map_err(|e| e.to_string())? as usize)
        } else {
            None
        };
        let node_type = flags & 0x03;
        let mut name = None;
        let mut parser = None;
        let mut range = ArgRange::None;
        let mut entity_properties = 0u8;
        if node_type == FLAG_LITERAL || node_type == FLAG_ARGUMENT {
            name = Some(read_string(&mut buf, 32767).map_err(|e| e.to_string())?);
        }
        if node_type == FLAG_ARGUMENT {
            let id = read_varint(&mut buf).map_err(|e| e.to_string())?;
            parser = Some(id);
            match id {
                parsers::FLOAT => {
                    let prop_flags = buf.get_u8();
                    let min = if prop_flags & 0x01 != 0 { buf.get_f32() } else { 0.0 };
                    let max = if prop_flags & 0x02 != 0 { buf.get_f32() } else { 0.0 };
                    if prop_flags != 0 {
                        range = ArgRange::Float { min, max };
                    }
                }
                parsers::DOUBLE => {
                    let prop_flags = buf.get_u8();
                    let min = if prop_flags & 0x01 != 0 { buf.get_f64() } else { 0.0 };
                    let max = if prop_flags & 0x02 != 0 { buf.get_f64() } else { 0.0 };
                    if prop_flags != 0 {
                        range = ArgRange::Double { min, max };
                    }
                }
                parsers::INTEGER => {
                    let prop_flags = buf.get_u8();
                    let min = if prop_flags & 0x01 != 0 { buf.get_i32() } else { 0 };
                    let max = if prop_flags & 0x02 != 0 { buf.get_i32() } else { 0 };
                    if prop_flags != 0 {
                        range = ArgRange::Int { min, max };
                    }
                }
                parsers::ENTITY => {
                    entity_properties = buf.get_u8();
                }
                parsers::TIME => {
                    let min = buf.get_i32();
                    if min != 0 {
                        range = ArgRange::Int { min, max: 0 };
                    }
                }
                _ => {}
            }
        }
        let suggestions = if flags & FLAG_SUGGESTIONS != 0 {
            Some(read_string(&mut buf, 32767).map_err(|e| e.to_string())?)
        } else {
            None
        };
        raw_nodes.push(RawNode {
            flags,
            children,
            redirect,
            name,
            parser,
            range,
            entity_properties,
            suggestions,
        });
    }

    let root_index = read_varint(&mut buf).map_err(|e| e.to_string())? as usize;
    if root_index != 0 {
        return Err(format!("unexpected root index {root_index}"));
    }

    let nodes = raw_nodes
        .into_iter()
        .map(|raw| {
            let kind = match raw.flags & 0x03 {
                0x00 => NodeKind::Root,
                FLAG_LITERAL => NodeKind::Literal(raw.name.unwrap_or_default()),
                FLAG_ARGUMENT => NodeKind::Argument {
                    name: raw.name.unwrap_or_default(),
                    parser: raw.parser.unwrap_or(0),
                },
                other => return Err(format!("bad node type bits {other}")),
            };
            Ok(CommandNode::<()> {
                kind,
                executable: raw.flags & FLAG_EXECUTABLE != 0,
                console_executable: false,
                redirect: raw.redirect,
                suggestions: raw.suggestions,
                range: raw.range,
                entity_properties: raw.entity_properties,
                children: raw.children,
                handler: None,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(CommandGraph { nodes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CommandBuilder;

    fn sample_graph() -> CommandGraph<()> {
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder
            .literal("time")
            .literal_exec("set", true, true)
            .argument_exec("time", parsers::TIME, true, true)
            .int_range(0, 0)
            .end()
            .end()
            .literal_exec("query", true, true)
            .literal_exec("daytime", true, true)
            .end()
            .end()
            .end();
        builder
            .literal("worldborder")
            .literal_exec("set", true, true)
            .argument_exec("distance", parsers::DOUBLE, true, true)
            .double_range(-59999968.0, 59999968.0)
            .end()
            .end()
            .literal_exec("center", true, true)
            .argument_exec("pos", parsers::VEC2, true, true)
            .end()
            .end()
            .end();
        builder
            .literal("gamemode")
            .argument_exec("mode", parsers::GAMEMODE, true, false)
            .argument_exec("player", parsers::ENTITY, true, true)
            .entity_properties(true, true)
            .end()
            .end()
            .end();
        builder.build()
    }

    fn structurally_equal(a: &CommandGraph<()>, b: &CommandGraph<()>) -> bool {
        if a.nodes.len() != b.nodes.len() {
            return false;
        }
        // Compare node-by-node after BFS renumbering: serialize both and
        // compare bytes, which is the canonical form.
        serialize(a) == serialize(b)
    }

    #[test]
    fn test_serialize_starts_with_count_and_ends_with_root() {
        let graph = sample_graph();
        let data = serialize(&graph);
        let mut buf = BytesMut::from(&data[..]);
        let count = read_varint(&mut buf).unwrap();
        assert_eq!(count as usize, graph.nodes.len());
        assert_eq!(*data.last().unwrap(), 0, "root index is node 0");
    }

    #[test]
    fn test_roundtrip_without_redirects() {
        let graph = sample_graph();
        let data = serialize(&graph);
        let parsed = deserialize(&data).unwrap();
        assert!(structurally_equal(&parsed, &graph));
    }

    #[test]
    fn test_flags_byte_layout() {
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder
            .literal_exec("x", true, false)
            .argument("id", parsers::RESOURCE)
            .suggestion_identifier("bossbars")
            .end()
            .end();
        let graph = builder.build();
        let data = serialize(&graph);
        let parsed = deserialize(&data).unwrap();
        // Node 1 = literal "x", executable.
        assert!(parsed.nodes[1].executable);
        // Node 2 = argument with suggestions.
        assert_eq!(parsed.nodes[2].suggestions.as_deref(), Some("bossbars"));
    }

    #[test]
    fn test_zero_min_is_unbounded_on_the_wire() {
        // int_range(0, 10): only the max flag is set, min is absent.
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder
            .literal("cmd")
            .argument_exec("n", parsers::INTEGER, true, true)
            .int_range(0, 10)
            .end()
            .end();
        let graph = builder.build();
        let parsed = deserialize(&serialize(&graph)).unwrap();
        assert_eq!(parsed.nodes[2].range, ArgRange::Int { min: 0, max: 10 });

        // And a full zero range serializes as no-bounds.
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder
            .literal("cmd")
            .argument_exec("n", parsers::INTEGER, true, true)
            .int_range(0, 0)
            .end()
            .end();
        let parsed = deserialize(&serialize(&builder.build())).unwrap();
        assert_eq!(parsed.nodes[2].range, ArgRange::None);
    }

    #[test]
    fn test_redirect_serialized_as_index() {
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder.literal_exec("teleport", true, true).end();
        builder.literal("tp").redirect(1).end();
        let graph = builder.build();
        let data = serialize(&graph);
        let parsed = deserialize(&data).unwrap();
        let tp = parsed
            .nodes
            .iter()
            .find(|n| matches!(n.kind, NodeKind::Literal(ref s) if s == "tp"))
            .unwrap();
        assert_eq!(tp.redirect, Some(1));
    }
}
