//! Table files set up the routes, mappings and mounts of a node.
//!
//! One directive per line:
//!
//! ``` ignore,
//! # comment
//! route add <pattern> <destination> [prio=<n>] [nocache] [redirect]
//! route remove <pattern> <destination>
//! map <uri> <authority> [algo=<id>] [recurse]
//! mount <template>
//! ```
//!
//! A pattern written as `/.../` is a regular expression, anything else must equal the wire
//! form of a name. An authority of `-` means none. Errors name the line they occur on.
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::{debug, info};
use url::Url;

use crate::algo::Algorithm;
use crate::error::Error;
use crate::mapping::MapOptions;
use crate::mount::MountTransform;
use crate::node::Node;
use crate::routing::{Pattern, RouteOptions};

#[derive(Debug, Clone)]
pub enum Directive {
    RouteAdd {
        pattern: Pattern,
        destination: Url,
        options: RouteOptions,
    },
    RouteRemove {
        pattern: Pattern,
        destination: Url,
    },
    Map {
        uri: String,
        authority: Option<String>,
        options: MapOptions,
    },
    Mount {
        template: String,
    },
}

#[derive(Debug, Clone)]
pub struct Line {
    pub number: usize,
    pub directive: Directive,
}

fn config_err(line: usize, msg: String) -> Error {
    Error::Config {
        line,
        msg,
    }
}

fn parse_pattern(s: &str) -> Result<Pattern, String> {
    match s.strip_prefix('/').and_then(|v| v.strip_suffix('/')) {
        Some(re) if s.len() > 1 => Pattern::regex(re).map_err(|e| e.to_string()),
        _ => Ok(Pattern::Exact(s.to_string())),
    }
}

fn parse_url(s: &str) -> Result<Url, String> {
    Url::parse(s).map_err(|e| format!("bad destination '{}': {}", s, e))
}

fn parse_route(args: &[&str]) -> Result<Directive, String> {
    match args {
        ["add", pattern, dest, flags @ ..] => {
            let mut options = RouteOptions::default();
            for f in flags {
                match *f {
                    "nocache" => options.no_cache = true,
                    "redirect" => options.redirect = true,
                    other => match other.strip_prefix("prio=") {
                        Some(v) => {
                            options.priority = u8::from_str(v).map_err(|e| format!("bad priority '{}': {}", v, e))?;
                        },
                        None => {
                            return Err(format!("unknown route option '{}'", other));
                        },
                    },
                }
            }
            Ok(Directive::RouteAdd {
                pattern: parse_pattern(pattern)?,
                destination: parse_url(dest)?,
                options,
            })
        },
        ["remove", pattern, dest] => Ok(Directive::RouteRemove {
            pattern: parse_pattern(pattern)?,
            destination: parse_url(dest)?,
        }),
        _ => Err(String::from("expected 'route add <pattern> <dest> [options]' or 'route remove <pattern> <dest>'")),
    }
}

fn parse_map(args: &[&str]) -> Result<Directive, String> {
    match args {
        [uri, authority, flags @ ..] => {
            let mut options = MapOptions::default();
            for f in flags {
                match *f {
                    "recurse" => options.recurse = true,
                    other => match other.strip_prefix("algo=") {
                        Some(v) => {
                            options.algorithm = Algorithm::from_str(v).map_err(|e| e.to_string())?;
                        },
                        None => {
                            return Err(format!("unknown map option '{}'", other));
                        },
                    },
                }
            }
            let authority = match *authority {
                "-" => None,
                v => Some(v.to_string()),
            };
            Ok(Directive::Map {
                uri: uri.to_string(),
                authority,
                options,
            })
        },
        _ => Err(String::from("expected 'map <uri> <authority> [options]'")),
    }
}

fn parse_line(line: &str) -> Result<Option<Directive>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((k, r)) => (k, r.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();
    let directive = match keyword {
        "route" => parse_route(&args)?,
        "map" => parse_map(&args)?,
        "mount" => {
            if rest.is_empty() {
                return Err(String::from("mount without template"));
            }
            MountTransform::parse(rest).map_err(|e| e.to_string())?;
            Directive::Mount {
                template: rest.to_string(),
            }
        },
        other => {
            return Err(format!("unknown directive '{}'", other));
        },
    };
    Ok(Some(directive))
}

pub fn parse(s: &str) -> Result<Vec<Line>, Error> {
    let mut lines = vec![];
    for (i, l) in s.lines().enumerate() {
        let number = i + 1;
        if let Some(directive) = parse_line(l).map_err(|e| config_err(number, e))? {
            lines.push(Line {
                number,
                directive,
            });
        }
    }
    Ok(lines)
}

pub fn load(path: &Path) -> Result<Vec<Line>, Error> {
    info!("loading tables from {:?}", path);
    let s = fs::read_to_string(path)?;
    parse(&s)
}

/// Apply the directives in order. Registration of mapped resources happens here.
pub fn apply(node: &Node, lines: &[Line]) -> Result<(), Error> {
    for l in lines {
        debug!("line {}: {:?}", l.number, l.directive);
        match &l.directive {
            Directive::RouteAdd {
                pattern,
                destination,
                options,
            } => node.add_route(pattern.clone(), destination.clone(), *options),
            Directive::RouteRemove {
                pattern,
                destination,
            } => {
                if !node.remove_route(pattern, destination) {
                    debug!("line {}: no route {} -> {} to remove", l.number, pattern, destination);
                }
            },
            Directive::Map {
                uri,
                authority,
                options,
            } => {
                let names = node
                    .register(uri, authority.as_deref(), options)
                    .map_err(|e| config_err(l.number, e.to_string()))?;
                info!("line {}: mapped {} names from {}", l.number, names.len(), uri);
            },
            Directive::Mount {
                template,
            } => node.add_mount(template).map_err(|e| config_err(l.number, e.to_string()))?,
        }
    }
    Ok(())
}
