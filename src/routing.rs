//! Next hops for names that are not served locally.
//!
//! Each entry pairs a pattern over the wire form of a name with a destination. Lookup is a
//! linear scan over all entries; tables are small and kept by hand.
use std::collections::HashMap;
use std::fmt;

use log::debug;
use regex::Regex;
use url::Url;

use crate::error::Error;
use crate::name::Name;

/// Priority of a route added without one. Lower values are preferred.
pub const DEFAULT_PRIORITY: u8 = 255;

#[derive(Debug, Clone)]
pub enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    pub fn regex(s: &str) -> Result<Pattern, Error> {
        Ok(Pattern::Regex(Regex::new(s)?))
    }

    pub fn matches(&self, wire: &str) -> bool {
        match self {
            Pattern::Exact(s) => s == wire,
            Pattern::Regex(r) => r.is_match(wire),
        }
    }

    fn same(&self, other: &Pattern) -> bool {
        match (self, other) {
            (Pattern::Exact(a), Pattern::Exact(b)) => a == b,
            (Pattern::Regex(a), Pattern::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Exact(s) => fmt.write_str(s),
            Pattern::Regex(r) => write!(fmt, "/{}/", r.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteOptions {
    pub priority: u8,
    pub no_cache: bool,
    pub redirect: bool,
}

impl Default for RouteOptions {
    fn default() -> RouteOptions {
        RouteOptions {
            priority: DEFAULT_PRIORITY,
            no_cache: false,
            redirect: false,
        }
    }
}

impl RouteOptions {
    pub fn with_priority(priority: u8) -> RouteOptions {
        RouteOptions {
            priority,
            ..RouteOptions::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub pattern: Pattern,
    pub destination: Url,
    pub options: RouteOptions,
}

/// A destination chosen for a name, with the options of its best matching entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub destination: Url,
    pub options: RouteOptions,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    entries: Vec<RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> RoutingTable {
        RoutingTable::default()
    }

    /// Add a route. An entry with the same pattern and destination is replaced.
    pub fn add(&mut self, pattern: Pattern, destination: Url, options: RouteOptions) {
        debug!("route add {} -> {} prio {}", pattern, destination, options.priority);
        match self
            .entries
            .iter_mut()
            .find(|e| e.pattern.same(&pattern) && e.destination == destination)
        {
            Some(e) => {
                e.options = options;
            },
            None => {
                self.entries.push(RouteEntry {
                    pattern,
                    destination,
                    options,
                });
            },
        }
    }

    /// Remove the route for the pattern and destination, if there is one. An exact pattern
    /// never removes a regex entry with the same text, nor the other way round.
    pub fn remove(&mut self, pattern: &Pattern, destination: &Url) -> bool {
        debug!("route remove {} -> {}", pattern, destination);
        let before = self.entries.len();
        self.entries
            .retain(|e| !(e.pattern.same(pattern) && &e.destination == destination));
        before != self.entries.len()
    }

    /// Destinations for the name, best first.
    ///
    /// When several matching entries share a destination, only the one with the lowest
    /// priority value counts.
    pub fn resolve(&self, name: &Name) -> Vec<Route> {
        let wire = name.to_wire_string();
        let mut order: Vec<Url> = vec![];
        let mut best: HashMap<Url, RouteOptions> = HashMap::new();
        for e in self.entries.iter().filter(|e| e.pattern.matches(&wire)) {
            match best.get(&e.destination) {
                Some(o) if o.priority <= e.options.priority => {},
                Some(_) => {
                    best.insert(e.destination.clone(), e.options);
                },
                None => {
                    order.push(e.destination.clone());
                    best.insert(e.destination.clone(), e.options);
                },
            }
        }
        let mut routes: Vec<Route> = order
            .into_iter()
            .filter_map(|d| {
                let options = *best.get(&d)?;
                Some(Route {
                    destination: d,
                    options,
                })
            })
            .collect();
        routes.sort_by_key(|r| r.options.priority);
        debug!("{} routes for {}", routes.len(), wire);
        routes
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{Pattern, RouteOptions, RoutingTable, DEFAULT_PRIORITY};
    use crate::algo::Algorithm;
    use crate::name::Name;

    fn village() -> Url {
        Url::parse("nihttp://village.n4c.eu").unwrap()
    }

    #[test]
    fn test_collapse_to_lowest_priority() {
        let n = Name::from_content(Some("village.n4c.eu"), b"foo", Algorithm::Sha256);
        let mut table = RoutingTable::new();
        table.add(Pattern::regex(r"^ni://village\.n4c\.eu/.*").unwrap(), village(), RouteOptions::with_priority(5));
        table.add(Pattern::Exact(n.to_wire_string()), village(), RouteOptions::with_priority(1));

        let routes = table.resolve(&n);
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].destination, village());
        assert_eq!(routes[0].options.priority, 1);
    }

    #[test]
    fn test_sorted_by_priority() {
        let n = Name::from_content(Some("ietf.org"), b"foo", Algorithm::Sha256);
        let mut table = RoutingTable::new();
        let slow = Url::parse("nihttp://village.n4c.com").unwrap();
        let udp = Url::parse("niudp://local").unwrap();
        table.add(Pattern::regex(r"^ni://ietf.*").unwrap(), slow.clone(), RouteOptions::default());
        table.add(
            Pattern::regex(r"^ni://ietf\.org/.*").unwrap(),
            village(),
            RouteOptions {
                priority: 1,
                no_cache: true,
                redirect: true,
            },
        );
        table.add(Pattern::regex(".*").unwrap(), udp.clone(), RouteOptions::with_priority(10));

        let routes = table.resolve(&n);
        let dests: Vec<Url> = routes.iter().map(|r| r.destination.clone()).collect();
        assert_eq!(dests, vec![village(), udp, slow]);
        assert!(routes[0].options.redirect);
        assert_eq!(routes[2].options.priority, DEFAULT_PRIORITY);
    }

    #[test]
    fn test_no_match() {
        let n = Name::from_content(Some("example.com"), b"foo", Algorithm::Sha256);
        let mut table = RoutingTable::new();
        table.add(Pattern::Exact(String::from("ni://example.com/sha-256;nope")), village(), RouteOptions::default());
        assert!(table.resolve(&n).is_empty());
    }

    #[test]
    fn test_add_replaces_and_remove() {
        let mut table = RoutingTable::new();
        table.add(Pattern::regex("^ni:").unwrap(), village(), RouteOptions::with_priority(3));
        table.add(Pattern::regex("^ni:").unwrap(), village(), RouteOptions::with_priority(7));
        assert_eq!(table.len(), 1);
        assert_eq!(table.entries()[0].options.priority, 7);

        assert!(!table.remove(&Pattern::regex("^nih:").unwrap(), &village()));
        assert!(table.remove(&Pattern::regex("^ni:").unwrap(), &village()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_remove_keeps_kind_apart() {
        let mut table = RoutingTable::new();
        table.add(Pattern::Exact(String::from("^ni:")), village(), RouteOptions::default());
        table.add(Pattern::regex("^ni:").unwrap(), village(), RouteOptions::default());
        assert_eq!(table.len(), 2);

        assert!(table.remove(&Pattern::Exact(String::from("^ni:")), &village()));
        assert_eq!(table.len(), 1);
        assert!(matches!(table.entries()[0].pattern, Pattern::Regex(_)));
        assert!(!table.remove(&Pattern::Exact(String::from("^ni:")), &village()));
        assert!(table.remove(&Pattern::regex("^ni:").unwrap(), &village()));
    }

    #[test]
    fn test_bad_regex() {
        assert!(Pattern::regex("(").is_err());
    }
}
