use std::fs;
use std::io::{self, Write};
use std::process;
use std::str::FromStr;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use env_logger;
use log::{debug, error, info, warn};
use serde_json::Map;
use url::Url;

use netinf::cl::http::{HttpConfig, HttpConvergence};
use netinf::cl::udp::{MessageType, UdpConvergence, UdpMessage};
use netinf::cl::{new_msg_id, ConvergenceLayer, Reply};
use netinf::error::Error;
use netinf::integrity::{DigestChecker, IntegrityChecker, Verdict};
use netinf::name::Name;
use netinf::node::{Node, Outcome, RetryPolicy};
use netinf::store::FileStore;
use netinf::tabfile;

mod arg;

use arg::{Command, NrsAction, Settings};

const BACKOFF_MILLIS: u64 = 500;

fn retry_policy(settings: &Settings) -> RetryPolicy {
    RetryPolicy {
        attempts: settings.retries.max(1),
        backoff: Duration::from_millis(BACKOFF_MILLIS),
    }
}

fn http_layer(settings: &Settings) -> HttpConvergence {
    HttpConvergence::new(&HttpConfig {
        timeout: settings.timeout,
    })
}

fn build_node(settings: &Settings, layers: Vec<Arc<dyn ConvergenceLayer>>) -> Result<Node, Error> {
    let store = FileStore::new(&settings.store)?;
    let mut node = Node::new(Box::new(store), Box::new(DigestChecker), settings.timeout).with_retry(retry_policy(settings));
    node.bind(Arc::new(http_layer(settings)));
    for layer in layers {
        node.bind(layer);
    }
    if let Some(p) = &settings.tables {
        tabfile::apply(&node, &tabfile::load(p)?)?;
    }
    Ok(node)
}

fn parse_url(s: &str) -> Result<Url, Error> {
    Url::parse(s).map_err(|e| Error::Unsupported(format!("bad destination '{}': {}", s, e)))
}

fn write_octets(octets: &[u8]) -> Result<(), Error> {
    let mut out = io::stdout();
    out.write_all(octets)?;
    out.flush()?;
    Ok(())
}

fn exec_hash(settings: &Settings, path: &std::path::Path) -> Result<(), Error> {
    let data = fs::read(path)?;
    let mut name = Name::from_content(settings.authority.as_deref(), &data, settings.algorithm);
    if let Some(ct) = mime_guess::from_path(path).first() {
        name = name.with_content_type(ct.essence_str());
    }
    println!("{}", name.to_wire_string());
    println!("{}", name.to_human_readable());
    println!("{}", hex::encode(name.to_binary()));
    if name.authority().is_some() {
        println!("{}", name.to_well_known_url());
    }
    Ok(())
}

fn exec_get(settings: &Settings, name: &Name, via: Option<&str>) -> Result<(), Error> {
    let layer = http_layer(settings);
    let msg_id = new_msg_id();
    let reply = retry_policy(settings).run("get", || layer.get(name, &msg_id, via))?;
    let res = match reply {
        Reply::Received(v) => v,
        Reply::Dispatched => return Ok(()),
    };
    match res.object {
        Some(object) => {
            if DigestChecker.verify(name, &object.octets) == Verdict::Bad {
                return Err(Error::IntegrityFailure(name.to_wire_string()));
            }
            info!("got {} bytes of {}", object.octets.len(), object.content_type);
            write_octets(&object.octets)
        },
        None => {
            for l in res.meta.locators.iter() {
                println!("{}", l);
            }
            Ok(())
        },
    }
}

fn exec_publish(settings: &Settings, name: &Name, to: &str, file: Option<&std::path::Path>, locators: &[String]) -> Result<(), Error> {
    let node = build_node(settings, vec![])?;
    let dest = parse_url(to)?;
    let data = match file {
        Some(p) => Some(fs::read(p)?),
        None => None,
    };
    if let Some(d) = &data {
        if !name.verify(d) {
            return Err(Error::IntegrityFailure(name.to_wire_string()));
        }
    }
    let object = data.as_deref().map(|d| (d, name.content_type()));
    match node.publish(&dest, name, object, locators)? {
        Reply::Received(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
        Reply::Dispatched => info!("publish of {} sent to {}", name, dest),
    }
    Ok(())
}

fn exec_search(settings: &Settings, tokens: &str, to: &str) -> Result<(), Error> {
    let node = build_node(settings, vec![])?;
    let dest = parse_url(to)?;
    match node.search(&dest, tokens)? {
        Reply::Received(results) => {
            for r in results.results.iter() {
                println!("{}\t{}\t{}", r.name, r.locator, r.description);
            }
        },
        Reply::Dispatched => info!("search sent to {}", dest),
    }
    Ok(())
}

fn exec_resolve(settings: &Settings, name: &Name) -> Result<(), Error> {
    let node = build_node(settings, vec![])?;
    match node.resolve(name)? {
        Outcome::Object {
            content_type,
            octets,
            source,
        } => {
            info!("{} from {:?} ({:?})", name, source, content_type);
            write_octets(&octets)
        },
        Outcome::Locators {
            locators,
            source,
        } => {
            info!("locators for {} from {}", name, source);
            for l in locators.iter() {
                println!("{}", l);
            }
            Ok(())
        },
        Outcome::Redirect {
            destination,
        } => {
            println!("redirect {}", destination);
            Ok(())
        },
        Outcome::Forwarded {
            destination,
        } => {
            println!("forwarded {}", destination);
            Ok(())
        },
    }
}

fn exec_nrs(settings: &Settings, server: &str, action: &NrsAction) -> Result<(), Error> {
    let nrs = http_layer(settings).nrs(server);
    let retry = retry_policy(settings);
    match action {
        NrsAction::Register {
            key,
            hints,
        } => {
            let entry = retry.run("nrs register", || nrs.register(key, hints))?;
            info!("{} now has hints {:?}", key, entry.hints);
        },
        NrsAction::Lookup {
            key,
        } => {
            for hop in retry.run("nrs lookup", || nrs.lookup(key))?.iter() {
                println!("{}", hop);
            }
        },
        NrsAction::List => {
            for (key, entry) in retry.run("nrs list", || nrs.list())?.iter() {
                println!("{}\t{}\t{}", key, entry.hints.join(","), entry.locators.join(","));
            }
        },
    }
    Ok(())
}

fn announce(rx: Receiver<UdpMessage>) {
    for msg in rx.iter() {
        println!("{:?} from {} ({:?}): {} {}", msg.msg_type, msg.instance, msg.source, msg.uri, msg.tokens.unwrap_or_default());
    }
}

fn exec_listen(settings: &Settings) -> Result<(), Error> {
    let udp = Arc::new(UdpConvergence::new(&settings.udp)?);
    let layer: Arc<dyn ConvergenceLayer> = udp.clone();
    let node = build_node(settings, vec![layer])?;
    let gets = udp.mount(MessageType::Get);
    let publishes = udp.mount(MessageType::Publish);
    let searches = udp.mount(MessageType::Search);
    thread::spawn(move || announce(searches));
    info!("listening as {} on {}", udp.id(), udp.local_addr()?);

    let node = &node;
    thread::scope(|s| {
        s.spawn(move || {
            for msg in publishes.iter() {
                let name = match msg.name() {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("ignoring publish of '{}': {}", msg.uri, e);
                        continue;
                    },
                };
                let locators = msg.locators.unwrap_or_default();
                if let Err(e) = node.accept_publish(&name, None, &locators, Map::new()) {
                    warn!("publish of {} from {}: {}", name, msg.instance, e);
                }
            }
        });

        for msg in gets.iter() {
            let name = match msg.name() {
                Ok(v) => v,
                Err(e) => {
                    debug!("ignoring get of '{}': {}", msg.uri, e);
                    continue;
                },
            };
            match node.locators(&name) {
                Ok(locators) if !locators.is_empty() => {
                    if let Err(e) = udp.get_response(&name, &msg.msg_id, &locators) {
                        warn!("answering {}: {}", msg.msg_id, e);
                    }
                },
                Ok(_) => debug!("nothing known about {}", name),
                Err(e) => warn!("looking up {}: {}", name, e),
            }
        }
    });
    Ok(())
}

fn run(settings: &Settings) -> Result<(), Error> {
    match &settings.command {
        Command::Hash {
            path,
        } => exec_hash(settings, path),
        Command::Get {
            name,
            via,
        } => exec_get(settings, &Name::from_str(name)?, via.as_deref()),
        Command::Publish {
            name,
            to,
            file,
            locators,
        } => exec_publish(settings, &Name::from_str(name)?, to, file.as_deref(), locators),
        Command::Search {
            tokens,
            to,
        } => exec_search(settings, tokens, to),
        Command::Resolve {
            name,
        } => exec_resolve(settings, &Name::from_str(name)?),
        Command::Listen => exec_listen(settings),
        Command::Nrs {
            server,
            action,
        } => exec_nrs(settings, server, action),
    }
}

fn main() {
    env_logger::init();

    let settings = Settings::from_args();
    if let Err(e) = run(&settings) {
        error!("{}", e);
        process::exit(1);
    }
}
