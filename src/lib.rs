#![crate_name = "netinf"]

//! netinf is a node for the NetInf content-centric naming protocol.
//!
//! Objects are named by the hash of their content. The same octets always get the same
//! name, and anyone holding the octets can check them against it.
//!
//! ## Names
//!
//! A name can be written as an `ni` uri, or in the human readable `nih` form with a check
//! digit:
//!
//! ``` ignore,
//! ni://example.com/sha-256;LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564
//! nih:1;2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae;d
//! ```
//!
//! See [Name](crate::name::Name) for the forms and [Algorithm](crate::algo::Algorithm) for
//! the hash suites.
//!
//! ## Resolution
//!
//! A [Node](crate::node::Node) answers a name from its object store and mapped local
//! resources, then from the candidate locations its mount templates give, and last by asking
//! the next hops in its routing table.
//!
//! ## Convergence layers
//!
//! GET, PUBLISH and SEARCH travel over HTTP, as blocking requests, or over UDP multicast,
//! where answers come back later on mounted channels. See the [cl](crate::cl) module.
//!
//! ## Running the node
//!
//! The `netinf` binary hashes files, talks to peers and runs a UDP listener. Routes,
//! mappings and mounts are read from a table file, see [tabfile](crate::tabfile). Set
//! `RUST_LOG` for log output. See `cargo run -- --help` for details.

/// The error type shared by every module.
pub mod error;

/// Hash suites a name may use.
pub mod algo;

/// base64url, hex and check digits.
pub mod encode;

/// The content hash name of an object.
pub mod name;

/// Local resources known by name.
pub mod mapping;

/// Templates turning a name into candidate locations.
pub mod mount;

/// Next hops by name pattern.
pub mod routing;

/// Convergence layers carrying GET, PUBLISH and SEARCH over HTTP and UDP.
pub mod cl;

/// Object octets and the metadata log.
pub mod store;

/// Checking octets against the name they were asked for by.
pub mod integrity;

/// Resolution and publication over the tables, the store and the convergence layers.
pub mod node;

/// Loading routes, mappings and mounts from a table file.
pub mod tabfile;

#[cfg(test)]
mod testutil;
