//! Admin command parser
//!
//! One command per line:
//!
//! ```text
//! addBlack <prefix>
//! addRoute sendAllMatch|sendFirstMatch <key> [prefix=X] [sub=Y] [regex=Z] <dest-spec>...
//! addDest <route-key> <dest-spec>
//! modDest <route-key> <index> <opt>...
//! modRoute <route-key> <opt>...
//! delRoute <route-key>
//! ```
//!
//! A `<dest-spec>` is an address followed by its options
//! (`spool=true|false pickle=true|false`). Option tokens carry a `=`;
//! addresses never do, which is what delimits one dest-spec from the next.

use cinder_routing::{Command, CommandError, DestOpts, DestSpec, MatcherSpec};

/// Parse one admin command line.
pub fn parse_command(input: &str) -> Result<Command, CommandError> {
    let mut tokens = input.split_whitespace().peekable();

    let verb = tokens
        .next()
        .ok_or_else(|| CommandError::Parse("empty command".into()))?;

    match verb {
        "addBlack" => {
            let prefix = required(&mut tokens, "prefix")?;
            expect_end(&mut tokens)?;
            Ok(Command::AddBlack { prefix })
        }

        "addRoute" => {
            let kind_token = required(&mut tokens, "route type")?;
            let kind = kind_token
                .parse()
                .map_err(|e: String| CommandError::Parse(e))?;
            let key = required(&mut tokens, "route key")?;
            let matcher = parse_matcher_opts(&mut tokens)?;
            let dests = parse_dest_specs(&mut tokens)?;
            if dests.is_empty() {
                return Err(CommandError::Parse(
                    "addRoute needs at least one destination".into(),
                ));
            }
            Ok(Command::AddRoute {
                kind: Some(kind),
                key,
                matcher,
                dests,
            })
        }

        "addDest" => {
            let key = required(&mut tokens, "route key")?;
            let mut dests = parse_dest_specs(&mut tokens)?;
            if dests.len() != 1 {
                return Err(CommandError::Parse(
                    "addDest takes exactly one destination".into(),
                ));
            }
            Ok(Command::AddDest {
                key,
                dest: dests.remove(0),
            })
        }

        "modDest" => {
            let key = required(&mut tokens, "route key")?;
            let index = required(&mut tokens, "destination index")?
                .parse::<usize>()
                .map_err(|_| CommandError::Parse("destination index must be a number".into()))?;
            let opts = parse_dest_opts(&mut tokens)?;
            Ok(Command::ModDest { key, index, opts })
        }

        "modRoute" => {
            let key = required(&mut tokens, "route key")?;
            let matcher = parse_matcher_opts(&mut tokens)?;
            expect_end(&mut tokens)?;
            if matcher.is_empty() {
                return Err(CommandError::Parse(
                    "modRoute needs at least one matcher option".into(),
                ));
            }
            Ok(Command::ModRoute { key, matcher })
        }

        "delRoute" => {
            let key = required(&mut tokens, "route key")?;
            expect_end(&mut tokens)?;
            Ok(Command::DelRoute { key })
        }

        other => Err(CommandError::Parse(format!("unknown command '{other}'"))),
    }
}

type Tokens<'a> = std::iter::Peekable<std::str::SplitWhitespace<'a>>;

fn required(tokens: &mut Tokens<'_>, what: &str) -> Result<String, CommandError> {
    tokens
        .next()
        .map(String::from)
        .ok_or_else(|| CommandError::Parse(format!("missing {what}")))
}

fn expect_end(tokens: &mut Tokens<'_>) -> Result<(), CommandError> {
    match tokens.next() {
        None => Ok(()),
        Some(extra) => Err(CommandError::Parse(format!("unexpected token '{extra}'"))),
    }
}

/// Consume leading `prefix=` / `sub=` / `regex=` tokens.
fn parse_matcher_opts(tokens: &mut Tokens<'_>) -> Result<MatcherSpec, CommandError> {
    let mut matcher = MatcherSpec::default();

    while let Some(&token) = tokens.peek() {
        let Some((name, value)) = token.split_once('=') else {
            break;
        };
        match name {
            "prefix" => matcher.prefix = Some(value.to_string()),
            "sub" => matcher.substring = Some(value.to_string()),
            "regex" => matcher.regex = Some(value.to_string()),
            _ => break, // not a matcher option; likely a dest option
        }
        tokens.next();
    }

    Ok(matcher)
}

/// Consume the remaining tokens as dest-specs.
fn parse_dest_specs(tokens: &mut Tokens<'_>) -> Result<Vec<DestSpec>, CommandError> {
    let mut dests: Vec<DestSpec> = Vec::new();

    for token in tokens {
        match token.split_once('=') {
            None => dests.push(DestSpec::new(token)),
            Some((name, value)) => {
                let dest = dests.last_mut().ok_or_else(|| {
                    CommandError::Parse(format!(
                        "option '{token}' appears before any destination address"
                    ))
                })?;
                match name {
                    "spool" => dest.spool = Some(parse_bool(name, value)?),
                    "pickle" => dest.pickle = Some(parse_bool(name, value)?),
                    "instance" => dest.instance = Some(value.to_string()),
                    _ => {
                        return Err(CommandError::Parse(format!(
                            "unknown destination option '{name}'"
                        )))
                    }
                }
            }
        }
    }

    Ok(dests)
}

/// Consume `addr=` / `spool=` / `pickle=` update options.
fn parse_dest_opts(tokens: &mut Tokens<'_>) -> Result<DestOpts, CommandError> {
    let mut opts = DestOpts::default();

    for token in tokens {
        let Some((name, value)) = token.split_once('=') else {
            return Err(CommandError::Parse(format!(
                "expected option, got '{token}'"
            )));
        };
        match name {
            "addr" => opts.addr = Some(value.to_string()),
            "spool" => opts.spool = Some(parse_bool(name, value)?),
            "pickle" => opts.pickle = Some(parse_bool(name, value)?),
            _ => {
                return Err(CommandError::Parse(format!(
                    "unknown destination option '{name}'"
                )))
            }
        }
    }

    Ok(opts)
}

fn parse_bool(name: &str, value: &str) -> Result<bool, CommandError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(CommandError::Parse(format!(
            "{name} must be true or false, got '{other}'"
        ))),
    }
}

#[cfg(test)]
#[path = "parse_test.rs"]
mod parse_test;
