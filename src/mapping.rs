//! Local resources registered under the names of their content.
//!
//! A file or a web resource is hashed once at registration, and the resulting name is kept
//! together with the location of the resource. Looking up the name later gives back that
//! location.
use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use log::{debug, info, warn};
use ureq::Agent;
use url::Url;

use crate::algo::Algorithm;
use crate::error::{from_ureq, Error};
use crate::name::Name;

#[derive(Debug, Clone, Default)]
pub struct MapOptions {
    pub algorithm: Algorithm,
    /// Descend into subdirectories when registering a directory.
    pub recurse: bool,
}

#[derive(Debug, Clone)]
pub struct MapEntry {
    /// Name carrying the `ct` or `loc` hint recorded at registration.
    pub name: Name,
    pub resource: Url,
    pub options: MapOptions,
}

#[derive(Debug, Default)]
pub struct MappingTable {
    entries: HashMap<Name, MapEntry>,
}

#[cfg(feature = "magic")]
fn detect_content_type(path: &Path, data: &[u8]) -> Option<String> {
    let t = tree_magic::from_u8(data);
    if t != "application/octet-stream" {
        return Some(t);
    }
    guess_content_type(path)
}

#[cfg(not(feature = "magic"))]
fn detect_content_type(path: &Path, _data: &[u8]) -> Option<String> {
    guess_content_type(path)
}

fn guess_content_type(path: &Path) -> Option<String> {
    mime_guess::from_path(path).first().map(|m| m.essence_str().to_string())
}

/// Fetch the content behind an http url.
pub fn fetch(agent: &Agent, url: &Url) -> Result<Vec<u8>, Error> {
    debug!("fetching {}", url);
    let res = agent.get(url.as_str()).call().map_err(|e| from_ureq(e, url.as_str()))?;
    let mut data = vec![];
    res.into_reader().read_to_end(&mut data)?;
    Ok(data)
}

impl MappingTable {
    pub fn new() -> MappingTable {
        MappingTable::default()
    }

    /// Register one file, returning its name with a `ct` hint when a type could be guessed.
    pub fn register_file(&mut self, path: &Path, authority: Option<&str>, algorithm: Algorithm) -> Result<Name, Error> {
        let options = MapOptions {
            algorithm,
            recurse: false,
        };
        self.add_file(path, authority, &options)
    }

    fn add_file(&mut self, path: &Path, authority: Option<&str>, options: &MapOptions) -> Result<Name, Error> {
        let abs = path.canonicalize()?;
        let data = fs::read(&abs)?;
        let mut name = Name::from_content(authority, &data, options.algorithm);
        if let Some(ct) = detect_content_type(&abs, &data) {
            name = name.with_content_type(&ct);
        }
        let resource = Url::from_file_path(&abs)
            .map_err(|_| Error::Unsupported(format!("cannot express {:?} as a file url", abs)))?;
        info!("adding entry for {} -> {}", name, resource);
        self.insert(MapEntry {
            name: name.clone(),
            resource,
            options: options.clone(),
        });
        Ok(name)
    }

    /// Register a file, or the files of a directory.
    ///
    /// Subdirectories are only visited when `options.recurse` is set. Unreadable entries
    /// inside a directory are skipped.
    pub fn register_path(&mut self, path: &Path, authority: Option<&str>, options: &MapOptions) -> Result<Vec<Name>, Error> {
        if !path.is_dir() {
            return Ok(vec![self.add_file(path, authority, options)?]);
        }
        info!("adding directory {:?}", path);
        let mut paths: Vec<_> = fs::read_dir(path)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .collect();
        paths.sort();

        let mut names = vec![];
        for p in paths {
            if p.is_dir() {
                if options.recurse {
                    names.extend(self.register_path(&p, authority, options)?);
                }
                continue;
            }
            match self.add_file(&p, authority, options) {
                Ok(n) => names.push(n),
                Err(e) => {
                    warn!("skipping {:?}: {}", p, e);
                },
            }
        }
        Ok(names)
    }

    /// Fetch and register a web resource; the url becomes the `loc` hint of the name.
    pub fn register_http(&mut self, agent: &Agent, authority: Option<&str>, url: &Url, algorithm: Algorithm) -> Result<Name, Error> {
        let data = fetch(agent, url)?;
        Ok(self.insert_http(authority, url, &data, algorithm))
    }

    /// Register content already fetched from `url`.
    pub fn insert_http(&mut self, authority: Option<&str>, url: &Url, data: &[u8], algorithm: Algorithm) -> Name {
        let name = Name::from_content(authority, data, algorithm).with_locator(url.as_str());
        info!("adding http entry for {} -> {}", name, url);
        self.insert(MapEntry {
            name: name.clone(),
            resource: url.clone(),
            options: MapOptions {
                algorithm,
                recurse: false,
            },
        });
        name
    }

    /// Register by uri, dispatching on its scheme.
    pub fn register(&mut self, agent: &Agent, uri: &str, authority: Option<&str>, options: &MapOptions) -> Result<Vec<Name>, Error> {
        let u = Url::parse(uri).map_err(|e| Error::Unsupported(format!("{}: {}", uri, e)))?;
        match u.scheme() {
            "file" => {
                let p = u
                    .to_file_path()
                    .map_err(|_| Error::Unsupported(format!("{} has no local path", uri)))?;
                self.register_path(&p, authority, options)
            },
            "http" | "https" => Ok(vec![self.register_http(agent, authority, &u, options.algorithm)?]),
            other => Err(Error::Unsupported(format!("cannot map {} resources", other))),
        }
    }

    pub fn insert(&mut self, entry: MapEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn find(&self, name: &Name) -> Option<&MapEntry> {
        self.entries.get(name)
    }

    pub fn all_names(&self) -> Vec<Name> {
        self.entries.values().map(|e| e.name.clone()).collect()
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
    use std::fs::{create_dir, write};

    use tempfile::tempdir;
    use ureq::AgentBuilder;
    use url::Url;

    use super::{MapOptions, MappingTable};
    use crate::algo::Algorithm;
    use crate::name::Name;
    use crate::testutil;

    #[test]
    fn test_register_file() {
        let d = tempdir().unwrap();
        let fp = d.path().join("foo.txt");
        write(&fp, b"foo").unwrap();

        let mut table = MappingTable::new();
        let name = table.register_file(&fp, Some("example.com"), Algorithm::Sha256).unwrap();
        assert_eq!(name, Name::from_content(None, b"foo", Algorithm::Sha256));
        assert_eq!(name.content_type(), Some("text/plain"));

        let entry = table.find(&name).unwrap();
        assert_eq!(entry.resource.scheme(), "file");
        assert_eq!(entry.resource.to_file_path().unwrap(), fp.canonicalize().unwrap());
    }

    #[test]
    fn test_register_idempotent() {
        let d = tempdir().unwrap();
        let fp = d.path().join("foo");
        write(&fp, b"foo").unwrap();

        let mut table = MappingTable::new();
        let a = table.register_file(&fp, None, Algorithm::Sha256).unwrap();
        let b = table.register_file(&fp, None, Algorithm::Sha256).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);

        let c = table.register_file(&fp, None, Algorithm::Sha256Trunc64).unwrap();
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
        assert!(table.find(&c).is_some());
    }

    #[test]
    fn test_register_dir() {
        let d = tempdir().unwrap();
        write(d.path().join("a"), b"a").unwrap();
        write(d.path().join("b"), b"b").unwrap();
        let sub = d.path().join("sub");
        create_dir(&sub).unwrap();
        write(sub.join("c"), b"c").unwrap();

        let mut table = MappingTable::new();
        let names = table.register_path(d.path(), None, &MapOptions::default()).unwrap();
        assert_eq!(names.len(), 2);

        let options = MapOptions {
            algorithm: Algorithm::Sha256,
            recurse: true,
        };
        let names = table.register_path(d.path(), None, &options).unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(table.all_names().len(), 3);
        assert!(table.find(&Name::from_content(None, b"c", Algorithm::Sha256)).is_some());
    }

    #[test]
    fn test_register_missing_file() {
        let d = tempdir().unwrap();
        let mut table = MappingTable::new();
        assert!(table.register_file(&d.path().join("nope"), None, Algorithm::Sha256).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_register_http() {
        let host = testutil::serve(1, |req| {
            testutil::respond(req, 200, "text/plain", b"foo".to_vec());
        });
        let url = Url::parse(&format!("http://{}/foo", host)).unwrap();
        let agent = AgentBuilder::new().build();

        let mut table = MappingTable::new();
        let name = table.register_http(&agent, Some("example.com"), &url, Algorithm::Sha256).unwrap();
        assert_eq!(name, Name::from_content(None, b"foo", Algorithm::Sha256));
        assert_eq!(name.locator(), Some(url.as_str()));
        assert_eq!(table.find(&name).unwrap().resource, url);
    }

    #[test]
    fn test_register_by_uri() {
        let d = tempdir().unwrap();
        let fp = d.path().join("bar");
        write(&fp, b"bar").unwrap();
        let uri = Url::from_file_path(fp.canonicalize().unwrap()).unwrap();
        let agent = AgentBuilder::new().build();

        let mut table = MappingTable::new();
        let names = table.register(&agent, uri.as_str(), None, &MapOptions::default()).unwrap();
        assert_eq!(names, vec![Name::from_content(None, b"bar", Algorithm::Sha256)]);
        assert!(table.register(&agent, "ftp://x/y", None, &MapOptions::default()).is_err());
    }
}
