//! The node ties the tables, the convergence layers and the local collaborators together.
//!
//! A lookup walks three places in turn and stops at the first that satisfies it:
//!
//! 1. local: the object store, then the resource a mapped name was registered from;
//! 2. mounts: every candidate url the mount templates give for the name;
//! 3. routes: every destination of the routing table, best priority first.
//!
//! Full objects obtained from anywhere but the local store are checked against the name
//! before they are handed out, and copied into the store unless the route says otherwise.
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{Map, Value};
use ureq::{Agent, AgentBuilder};
use url::Url;

use crate::algo::Algorithm;
use crate::cl::nrs::{key_pattern, NrsClient};
use crate::cl::{new_msg_id, ConvergenceLayer, Reply, ResponseMeta, SearchResults};
use crate::error::Error;
use crate::integrity::{IntegrityChecker, Verdict};
use crate::mapping::{fetch, MapEntry, MapOptions, MappingTable};
use crate::mount::MountTable;
use crate::name::Name;
use crate::routing::{Pattern, RouteOptions, RoutingTable};
use crate::store::{MetadataRecord, Storage};

/// Where a resolved object came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Storage,
    /// The resource the name was registered from.
    Resource(Url),
    Mount(Url),
    Route(Url),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Object {
        content_type: Option<String>,
        octets: Vec<u8>,
        source: Source,
    },
    /// A peer knows where the object is but did not send it.
    Locators {
        locators: Vec<String>,
        source: Url,
    },
    /// The route asks the requester to go to the destination itself.
    Redirect {
        destination: Url,
    },
    /// The request went out on an asynchronous layer; any answer arrives there.
    Forwarded {
        destination: Url,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Stored,
    AlreadyStored,
    /// Only locators or metadata were given.
    Recorded,
}

/// How often transport failures are tried again.
///
/// Only [Error::is_transient] failures are retried. The wait grows linearly with the
/// attempt number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> RetryPolicy {
        RetryPolicy {
            attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn run<T, F>(&self, what: &str, mut f: F) -> Result<T, Error>
    where
        F: FnMut() -> Result<T, Error>,
    {
        let mut attempt: u32 = 1;
        loop {
            match f() {
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    warn!("{} failed, attempt {} of {}: {}", what, attempt, self.attempts, e);
                    thread::sleep(self.backoff * attempt);
                    attempt += 1;
                },
                r => {
                    return r;
                },
            }
        }
    }
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match l.read() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match l.write() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// `host[:port]` of a destination url, as the convergence layers take it.
pub fn next_hop(destination: &Url) -> Option<String> {
    let host = destination.host_str()?;
    Some(match destination.port() {
        Some(p) => format!("{}:{}", host, p),
        None => host.to_string(),
    })
}

pub struct Node {
    mapping: RwLock<MappingTable>,
    mounts: RwLock<MountTable>,
    routes: RwLock<RoutingTable>,
    bindings: HashMap<String, Arc<dyn ConvergenceLayer>>,
    storage: Box<dyn Storage>,
    checker: Box<dyn IntegrityChecker>,
    agent: Agent,
    retry: RetryPolicy,
}

impl Node {
    /// A node with empty tables and no convergence layers.
    ///
    /// `timeout` applies to plain http fetches of mapped and mounted resources.
    pub fn new(storage: Box<dyn Storage>, checker: Box<dyn IntegrityChecker>, timeout: Duration) -> Node {
        Node {
            mapping: RwLock::new(MappingTable::new()),
            mounts: RwLock::new(MountTable::new()),
            routes: RwLock::new(RoutingTable::new()),
            bindings: HashMap::new(),
            storage,
            checker,
            agent: AgentBuilder::new().timeout(timeout).build(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Node {
        self.retry = retry;
        self
    }

    /// Serve destinations of the layer's scheme with it, replacing any earlier binding.
    pub fn bind(&mut self, layer: Arc<dyn ConvergenceLayer>) {
        info!("binding convergence layer for {}", layer.scheme());
        self.bindings.insert(layer.scheme().to_string(), layer);
    }

    pub fn binding(&self, scheme: &str) -> Result<&Arc<dyn ConvergenceLayer>, Error> {
        self.bindings
            .get(scheme)
            .ok_or_else(|| Error::Unsupported(format!("no convergence layer for {}", scheme)))
    }

    pub fn storage(&self) -> &dyn Storage {
        self.storage.as_ref()
    }

    pub fn add_route(&self, pattern: Pattern, destination: Url, options: RouteOptions) {
        write(&self.routes).add(pattern, destination, options);
    }

    pub fn remove_route(&self, pattern: &Pattern, destination: &Url) -> bool {
        write(&self.routes).remove(pattern, destination)
    }

    /// Ask the name resolution service for the next hops of `key` and route to them.
    pub fn learn_routes(&self, nrs: &NrsClient, key: &str, options: RouteOptions) -> Result<Vec<Url>, Error> {
        let pattern = key_pattern(key)?;
        let hops = nrs.lookup(key)?;
        info!("learned {} next hops for {} from {}", hops.len(), key, nrs.server());
        let mut routes = write(&self.routes);
        for h in hops.iter() {
            routes.add(pattern.clone(), h.clone(), options);
        }
        Ok(hops)
    }

    pub fn add_mount(&self, template: &str) -> Result<(), Error> {
        write(&self.mounts).add_transform(template)
    }

    pub fn find(&self, name: &Name) -> Option<MapEntry> {
        read(&self.mapping).find(name).cloned()
    }

    pub fn mapped_names(&self) -> Vec<Name> {
        read(&self.mapping).all_names()
    }

    /// Copy the octets into the store and record where they came from.
    fn keep(&self, name: &Name, octets: &[u8], content_type: Option<&str>, locator: Option<&str>) -> Result<Published, Error> {
        let published = match self.storage.put_object(name, octets) {
            Ok(()) => Published::Stored,
            Err(Error::AlreadyExists(_)) => {
                debug!("{} already stored", name);
                Published::AlreadyStored
            },
            Err(e) => {
                return Err(e);
            },
        };
        let locators: Vec<String> = locator.into_iter().map(String::from).collect();
        let record = MetadataRecord::now(content_type, &locators, Map::new());
        self.storage.append_metadata(name, &record)?;
        Ok(published)
    }

    /// Map a file or directory and store the content of every file registered.
    pub fn register_path(&self, path: &Path, authority: Option<&str>, options: &MapOptions) -> Result<Vec<Name>, Error> {
        let names = write(&self.mapping).register_path(path, authority, options)?;
        for name in names.iter() {
            let entry = match self.find(name) {
                Some(v) => v,
                None => continue,
            };
            let fp = entry
                .resource
                .to_file_path()
                .map_err(|_| Error::Unsupported(format!("{} has no local path", entry.resource)))?;
            let octets = fs::read(fp)?;
            self.keep(name, &octets, name.content_type(), Some(entry.resource.as_str()))?;
        }
        Ok(names)
    }

    /// Fetch, map and store a web resource.
    pub fn register_http(&self, authority: Option<&str>, url: &Url, algorithm: Algorithm) -> Result<Name, Error> {
        let octets = self.retry.run("fetch", || fetch(&self.agent, url))?;
        let name = write(&self.mapping).insert_http(authority, url, &octets, algorithm);
        self.keep(&name, &octets, None, Some(url.as_str()))?;
        Ok(name)
    }

    /// Register by uri, dispatching on its scheme.
    pub fn register(&self, uri: &str, authority: Option<&str>, options: &MapOptions) -> Result<Vec<Name>, Error> {
        let u = Url::parse(uri).map_err(|e| Error::Unsupported(format!("{}: {}", uri, e)))?;
        match u.scheme() {
            "file" => {
                let p = u
                    .to_file_path()
                    .map_err(|_| Error::Unsupported(format!("{} has no local path", uri)))?;
                self.register_path(&p, authority, options)
            },
            "http" | "https" => Ok(vec![self.register_http(authority, &u, options.algorithm)?]),
            other => Err(Error::Unsupported(format!("cannot map {} resources", other))),
        }
    }

    /// Locators this node can give out for the name.
    pub fn locators(&self, name: &Name) -> Result<Vec<String>, Error> {
        let mut locators = match self.storage.read_metadata(name)? {
            Some(m) => m.loc,
            None => vec![],
        };
        if let Some(entry) = self.find(name) {
            let l = entry.resource.to_string();
            if !locators.contains(&l) {
                locators.push(l);
            }
        }
        Ok(locators)
    }

    fn checked(&self, name: &Name, octets: Vec<u8>) -> Result<Vec<u8>, Error> {
        match self.checker.verify(name, &octets) {
            Verdict::Good => Ok(octets),
            Verdict::Bad => Err(Error::IntegrityFailure(name.to_wire_string())),
        }
    }

    fn resolve_local(&self, name: &Name) -> Result<Option<Outcome>, Error> {
        if let Some(octets) = self.storage.get_object(name)? {
            let content_type = match self.storage.read_metadata(name)? {
                Some(m) => m.ct,
                None => None,
            };
            debug!("{} found in storage", name);
            return Ok(Some(Outcome::Object {
                content_type: content_type.or_else(|| name.content_type().map(String::from)),
                octets,
                source: Source::Storage,
            }));
        }
        let entry = match self.find(name) {
            Some(v) => v,
            None => return Ok(None),
        };
        let octets = self.fetch_url(&entry.resource)?;
        let octets = self.checked(name, octets)?;
        Ok(Some(Outcome::Object {
            content_type: entry.name.content_type().map(String::from),
            octets,
            source: Source::Resource(entry.resource),
        }))
    }

    fn fetch_url(&self, url: &Url) -> Result<Vec<u8>, Error> {
        match url.scheme() {
            "file" => {
                let p = url
                    .to_file_path()
                    .map_err(|_| Error::Unsupported(format!("{} has no local path", url)))?;
                match fs::read(p) {
                    Ok(v) => Ok(v),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::NotFound(url.to_string())),
                    Err(e) => Err(e.into()),
                }
            },
            "http" | "https" => self.retry.run("fetch", || fetch(&self.agent, url)),
            other => Err(Error::Unsupported(format!("cannot fetch {} resources", other))),
        }
    }

    fn via_layer(&self, layer: &Arc<dyn ConvergenceLayer>, name: &Name, destination: &Url, source: Source) -> Result<Outcome, Error> {
        let hop = next_hop(destination);
        let msg_id = new_msg_id();
        let reply = self
            .retry
            .run("get", || layer.get(name, &msg_id, hop.as_deref()))?;
        let res = match reply {
            Reply::Dispatched => {
                return Ok(Outcome::Forwarded {
                    destination: destination.clone(),
                });
            },
            Reply::Received(v) => v,
        };
        match res.object {
            Some(object) => {
                let octets = self.checked(name, object.octets)?;
                Ok(Outcome::Object {
                    content_type: Some(object.content_type),
                    octets,
                    source,
                })
            },
            None if res.meta.locators.is_empty() => Err(Error::NotFound(format!("{} has no locators at {}", name, destination))),
            None => Ok(Outcome::Locators {
                locators: res.meta.locators,
                source: destination.clone(),
            }),
        }
    }

    fn try_mount(&self, name: &Name, candidate: &Url) -> Result<Outcome, Error> {
        match candidate.scheme() {
            "file" | "http" | "https" => {
                let octets = self.fetch_url(candidate)?;
                let octets = self.checked(name, octets)?;
                Ok(Outcome::Object {
                    content_type: name.content_type().map(String::from),
                    octets,
                    source: Source::Mount(candidate.clone()),
                })
            },
            scheme => {
                let layer = self.binding(scheme)?;
                self.via_layer(layer, name, candidate, Source::Mount(candidate.clone()))
            },
        }
    }

    fn try_route(&self, name: &Name, destination: &Url, options: &RouteOptions) -> Result<Outcome, Error> {
        if options.redirect {
            return Ok(Outcome::Redirect {
                destination: destination.clone(),
            });
        }
        let layer = self.binding(destination.scheme())?;
        let outcome = self.via_layer(layer, name, destination, Source::Route(destination.clone()))?;
        if let Outcome::Object {
            content_type,
            octets,
            ..
        } = &outcome
        {
            if !options.no_cache {
                if let Err(e) = self.keep(name, octets, content_type.as_deref(), None) {
                    warn!("not caching {}: {}", name, e);
                }
            }
        }
        Ok(outcome)
    }

    /// Find the object, or where it is, for the name.
    pub fn resolve(&self, name: &Name) -> Result<Outcome, Error> {
        match self.resolve_local(name) {
            Ok(Some(outcome)) => return Ok(outcome),
            Ok(None) => {},
            Err(e) => {
                warn!("local lookup of {} failed: {}", name, e);
            },
        }

        let candidates: Vec<Url> = read(&self.mounts).resolve(name).collect();
        for candidate in candidates.iter() {
            match self.try_mount(name, candidate) {
                Ok(outcome) => {
                    if let Outcome::Object {
                        content_type,
                        octets,
                        ..
                    } = &outcome
                    {
                        if let Err(e) = self.keep(name, octets, content_type.as_deref(), Some(candidate.as_str())) {
                            warn!("not caching {}: {}", name, e);
                        }
                    }
                    info!("{} resolved by mount {}", name, candidate);
                    return Ok(outcome);
                },
                Err(e) => {
                    debug!("mount candidate {} for {}: {}", candidate, name, e);
                },
            }
        }

        let routes = read(&self.routes).resolve(name);
        for route in routes.iter() {
            match self.try_route(name, &route.destination, &route.options) {
                Ok(outcome) => {
                    info!("{} resolved by route {}", name, route.destination);
                    return Ok(outcome);
                },
                Err(e) => {
                    warn!("route {} for {}: {}", route.destination, name, e);
                },
            }
        }

        Err(Error::NotFound(name.to_wire_string()))
    }

    /// Take in a PUBLISH from a peer.
    ///
    /// An object that does not hash to the name is refused and nothing is recorded.
    pub fn accept_publish(
        &self,
        name: &Name,
        object: Option<&[u8]>,
        locators: &[String],
        metadata: Map<String, Value>,
    ) -> Result<Published, Error> {
        let published = match object {
            Some(octets) => {
                if self.checker.verify(name, octets) == Verdict::Bad {
                    warn!("refusing {} bytes published as {}", octets.len(), name);
                    return Err(Error::IntegrityFailure(name.to_wire_string()));
                }
                match self.storage.put_object(name, octets) {
                    Ok(()) => Published::Stored,
                    Err(Error::AlreadyExists(_)) => Published::AlreadyStored,
                    Err(e) => {
                        return Err(e);
                    },
                }
            },
            None => Published::Recorded,
        };
        let record = MetadataRecord::now(name.content_type(), locators, metadata);
        self.storage.append_metadata(name, &record)?;
        info!("publish of {}: {:?}", name, published);
        Ok(published)
    }

    /// Publish the object, or just its locators, to the destination.
    pub fn publish(
        &self,
        destination: &Url,
        name: &Name,
        object: Option<(&[u8], Option<&str>)>,
        locators: &[String],
    ) -> Result<Reply<ResponseMeta>, Error> {
        let layer = self.binding(destination.scheme())?;
        let hop = next_hop(destination).unwrap_or_default();
        let msg_id = new_msg_id();
        self.retry.run("publish", || match object {
            Some((octets, content_type)) => layer.publish_object(name, octets, content_type, &hop, &msg_id),
            None => layer.publish_locators(name, locators, &hop, &msg_id),
        })
    }

    pub fn search(&self, destination: &Url, tokens: &str) -> Result<Reply<SearchResults>, Error> {
        let layer = self.binding(destination.scheme())?;
        let hop = next_hop(destination).unwrap_or_default();
        let msg_id = new_msg_id();
        self.retry.run("search", || layer.search(&hop, &msg_id, tokens))
    }
}
