//! Tokenizing and executing command input against the graph.

use crate::graph::{parsers, ArgRange, CommandGraph, Invoker, NodeKind, OutputSink};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("incomplete command")]
    IncompleteCommand,
    #[error("unknown command or invalid arguments")]
    InvalidArguments,
}

/// Split input into tokens, honoring double-quoted strings.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in input.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            continue;
        }
        if c.is_whitespace() && !in_quotes {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else {
            current.push(c);
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

impl<C> CommandGraph<C> {
    /// Parse and execute one command line. Errors are reported through the
    /// output sink and also returned for the caller.
    pub fn execute(
        &self,
        ctx: &C,
        invoker: &Invoker,
        input: &str,
        output: OutputSink,
    ) -> Result<(), CommandError> {
        let tokens = tokenize(input);
        if tokens.is_empty() {
            return Err(CommandError::InvalidArguments);
        }

        let mut current = self.root();
        let mut args: Vec<String> = Vec::new();
        let mut token_index = 0usize;

        while token_index < tokens.len() {
            let token = &tokens[token_index];
            let mut matched = None;

            // Literal children win by exact match; otherwise the first
            // argument child whose parser accepts the token.
            for &child in self.effective_children(current) {
                if let NodeKind::Literal(ref name) = self.nodes[child].kind {
                    if name == token {
                        matched = Some(child);
                        break;
                    }
                }
            }
            if matched.is_none() {
                for &child in self.effective_children(current) {
                    if matches!(self.nodes[child].kind, NodeKind::Argument { .. })
                        && self.validate_argument(child, &tokens, &mut token_index, &mut args, invoker)
                    {
                        matched = Some(child);
                        break;
                    }
                }
            }

            match matched {
                Some(child) => current = child,
                None => {
                    output("Unknown command or invalid arguments.", true, &[]);
                    return Err(CommandError::InvalidArguments);
                }
            }
            token_index += 1;
        }

        let node = &self.nodes[current];
        let allowed = match invoker {
            Invoker::Console => node.console_executable,
            Invoker::Player { .. } => node.executable,
        };
        if allowed {
            if let Some(ref handler) = node.handler {
                handler(ctx, invoker, &args, output);
                return Ok(());
            }
        }
        output("Incomplete command.", true, &[]);
        Err(CommandError::IncompleteCommand)
    }

    /// A node's children, looked up through its redirect when it has no
    /// children of its own.
    fn effective_children(&self, index: usize) -> &[usize] {
        let node = &self.nodes[index];
        if node.children.is_empty() {
            if let Some(target) = node.redirect {
                return &self.nodes[target].children;
            }
        }
        &node.children
    }

    /// Validate a token (or token pair for vec2) against an argument node.
    /// On success, the canonical argument string is appended to `args` and
    /// `token_index` advanced past any extra consumed tokens.
    fn validate_argument(
        &self,
        node_index: usize,
        tokens: &[String],
        token_index: &mut usize,
        args: &mut Vec<String>,
        invoker: &Invoker,
    ) -> bool {
        let node = &self.nodes[node_index];
        let parser = match node.kind {
            NodeKind::Argument { parser, .. } => parser,
            _ => return false,
        };
        let token = &tokens[*token_index];

        match parser {
            parsers::BOOL => {
                if token == "true" || token == "false" {
                    args.push(token.clone());
                    true
                } else {
                    false
                }
            }
            parsers::FLOAT => {
                let value: f32 = match token.parse() {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                if let ArgRange::Float { min, max } = node.range {
                    // A zero bound means unbounded.
                    if min != 0.0 && value < min {
                        return false;
                    }
                    if max != 0.0 && value > max {
                        return false;
                    }
                }
                args.push(token.clone());
                true
            }
            parsers::DOUBLE => {
                let value: f64 = match token.parse() {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                if let ArgRange::Double { min, max } = node.range {
                    if min != 0.0 && value < min {
                        return false;
                    }
                    if max != 0.0 && value > max {
                        return false;
                    }
                }
                args.push(token.clone());
                true
            }
            parsers::INTEGER | parsers::LONG => {
                let value: i64 = match token.parse() {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                if let ArgRange::Int { min, max } = node.range {
                    if min != 0 && value < min as i64 {
                        return false;
                    }
                    if max != 0 && value > max as i64 {
                        return false;
                    }
                }
                args.push(token.clone());
                true
            }
            parsers::TIME => {
                let value: i32 = match token.parse() {
                    Ok(v) => v,
                    Err(_) => return false,
                };
                if let ArgRange::Int { min, .. } = node.range {
                    if value < min {
                        return false;
                    }
                }
                args.push(token.clone());
                true
            }
            parsers::VEC2 => {
                if *token_index + 1 >= tokens.len() {
                    return false;
                }
                let (origin_x, origin_z) = match invoker {
                    Invoker::Player { x, z, .. } => (*x, *z),
                    Invoker::Console => (0.0, 0.0),
                };
                let x = match parse_coord(&tokens[*token_index], origin_x) {
                    Some(v) => v,
                    None => return false,
                };
                let z = match parse_coord(&tokens[*token_index + 1], origin_z) {
                    Some(v) => v,
                    None => return false,
                };
                args.push(format!("{x},{z}"));
                *token_index += 1;
                true
            }
            // Entity selectors, profiles, resources, game modes and plain
            // strings accept any non-empty token.
            _ => {
                if token.is_empty() {
                    return false;
                }
                args.push(token.clone());
                true
            }
        }
    }
}

/// Parse a vec2 component: `~` and `~d` are relative to the invoker.
fn parse_coord(token: &str, origin: f64) -> Option<f64> {
    if let Some(rest) = token.strip_prefix('~') {
        if rest.is_empty() {
            Some(origin)
        } else {
            rest.parse::<f64>().ok().map(|d| origin + d)
        }
    } else {
        token.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::CommandBuilder;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Default)]
    struct TimeState {
        time_of_day: RefCell<i64>,
    }

    fn time_graph() -> CommandGraph<Rc<TimeState>> {
        let mut builder: CommandBuilder<Rc<TimeState>> = CommandBuilder::new();
        builder
            .literal("time")
            .literal_exec("set", true, true)
            .argument_exec("time", parsers::TIME, true, true)
            .int_range(0, 0)
            .handler(|ctx, _invoker, args, _output| {
                *ctx.time_of_day.borrow_mut() = args[0].parse().unwrap_or(0);
            })
            .end()
            .end()
            .literal_exec("query", true, true)
            .literal_exec("daytime", true, true)
            .handler(|ctx, _invoker, _args, output| {
                let value = *ctx.time_of_day.borrow();
                output("commands.time.query", false, &[value.to_string()]);
            })
            .end()
            .end()
            .end();
        builder.build()
    }

    fn collect_output() -> (Rc<RefCell<Vec<(String, bool, Vec<String>)>>>, impl FnMut(&str, bool, &[String])) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink_log = log.clone();
        let sink = move |key: &str, is_error: bool, args: &[String]| {
            sink_log.borrow_mut().push((key.to_string(), is_error, args.to_vec()));
        };
        (log, sink)
    }

    #[test]
    fn test_tokenize_quotes() {
        assert_eq!(tokenize("say hello world"), vec!["say", "hello", "world"]);
        assert_eq!(tokenize(r#"say "hello world" x"#), vec!["say", "hello world", "x"]);
        assert_eq!(tokenize("   "), Vec::<String>::new());
    }

    #[test]
    fn test_time_set_then_query() {
        // /time set 1000, then /time query daytime reports 1000.
        let ctx = Rc::new(TimeState::default());
        let graph = time_graph();
        let invoker = Invoker::Player { name: "Steve".into(), x: 0.0, z: 0.0 };
        let (log, mut sink) = collect_output();

        graph.execute(&ctx, &invoker, "time set 1000", &mut sink).unwrap();
        assert_eq!(*ctx.time_of_day.borrow(), 1000);

        graph.execute(&ctx, &invoker, "time query daytime", &mut sink).unwrap();
        let entries = log.borrow();
        assert_eq!(
            entries.last().unwrap(),
            &("commands.time.query".to_string(), false, vec!["1000".to_string()])
        );
    }

    #[test]
    fn test_incomplete_command_reported() {
        let ctx = Rc::new(TimeState::default());
        let graph = time_graph();
        let invoker = Invoker::Console;
        let (log, mut sink) = collect_output();
        let result = graph.execute(&ctx, &invoker, "time set", &mut sink);
        assert_eq!(result, Err(CommandError::IncompleteCommand));
        assert!(log.borrow()[0].1, "reported as error");
    }

    #[test]
    fn test_unknown_command() {
        let ctx = Rc::new(TimeState::default());
        let graph = time_graph();
        let (_, mut sink) = collect_output();
        let result = graph.execute(&ctx, &Invoker::Console, "abracadabra", &mut sink);
        assert_eq!(result, Err(CommandError::InvalidArguments));
    }

    #[test]
    fn test_negative_time_rejected_by_min() {
        // time's range is (0, 0): min 0 behaves as unbounded, so -5 parses;
        // the preserved quirk means the minimum cannot actually bind at 0.
        let ctx = Rc::new(TimeState::default());
        let graph = time_graph();
        let (_, mut sink) = collect_output();
        graph
            .execute(&ctx, &Invoker::Console, "time set -5", &mut sink)
            .unwrap();
        assert_eq!(*ctx.time_of_day.borrow(), -5);
    }

    #[test]
    fn test_console_requires_console_executable() {
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        builder.literal_exec("playersonly", true, false).handler(|_, _, _, _| {}).end();
        let graph = builder.build();
        let (_, mut sink) = collect_output();
        assert_eq!(
            graph.execute(&(), &Invoker::Console, "playersonly", &mut sink),
            Err(CommandError::IncompleteCommand)
        );
        let player = Invoker::Player { name: "a".into(), x: 0.0, z: 0.0 };
        assert!(graph.execute(&(), &player, "playersonly", &mut sink).is_ok());
    }

    #[test]
    fn test_vec2_relative_coordinates() {
        use std::sync::{Arc, Mutex};
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        let captured: Arc<Mutex<String>> = Arc::new(Mutex::new(String::new()));
        let slot = captured.clone();
        builder
            .literal("center")
            .argument_exec("pos", parsers::VEC2, true, true)
            .handler(move |_, _, args, _| {
                *slot.lock().unwrap() = args[0].clone();
            })
            .end()
            .end();
        let graph = builder.build();
        let invoker = Invoker::Player { name: "p".into(), x: 10.0, z: -4.0 };
        let (_, mut sink) = collect_output();
        graph.execute(&(), &invoker, "center ~2 ~", &mut sink).unwrap();
        assert_eq!(*captured.lock().unwrap(), "12,-4");
    }

    #[test]
    fn test_literal_preferred_over_argument() {
        use std::sync::{Arc, Mutex};
        // "set" must match the literal even though the argument child would
        // also accept the token.
        let mut builder: CommandBuilder<()> = CommandBuilder::new();
        let hit: Arc<Mutex<&'static str>> = Arc::new(Mutex::new(""));
        let (a, b) = (hit.clone(), hit.clone());
        builder
            .literal("cmd")
            .literal_exec("set", true, true)
            .handler(move |_, _, _, _| *a.lock().unwrap() = "literal")
            .end()
            .argument_exec("any", parsers::STRING, true, true)
            .handler(move |_, _, _, _| *b.lock().unwrap() = "argument")
            .end()
            .end();
        let graph = builder.build();
        let (_, mut sink) = collect_output();
        graph.execute(&(), &Invoker::Console, "cmd set", &mut sink).unwrap();
        assert_eq!(*hit.lock().unwrap(), "literal");
        graph.execute(&(), &Invoker::Console, "cmd other", &mut sink).unwrap();
        assert_eq!(*hit.lock().unwrap(), "argument");
    }
}
