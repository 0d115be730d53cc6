//! Object octets and per-name metadata.
//!
//! [Storage] is the interface the node expects; [FileStore] keeps everything in a
//! directory:
//!
//! ``` ignore,
//! <root>/ndo/<algorithm>/<digest>    object octets
//! <root>/meta/<algorithm>/<digest>   metadata log, one JSON record per line
//! ```
//!
//! Metadata is only ever appended. Reading it back consolidates the log into one view:
//! locators are deduplicated, metadata keys are merged with the latest value winning, and
//! `search` entries are gathered into a `searches` list.
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use crate::error::Error;
use crate::name::Name;

pub trait Storage: Send + Sync {
    fn get_object(&self, name: &Name) -> Result<Option<Vec<u8>>, Error>;

    /// Store octets under the name; [Error::AlreadyExists] if there are some already.
    fn put_object(&self, name: &Name, octets: &[u8]) -> Result<(), Error>;

    fn append_metadata(&self, name: &Name, record: &MetadataRecord) -> Result<(), Error>;

    /// The consolidated view over every record appended for the name.
    fn read_metadata(&self, name: &Name) -> Result<Option<Metadata>, Error>;
}

/// One entry of the metadata log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Seconds since the epoch.
    pub ts: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ct: Option<String>,
    #[serde(default)]
    pub loc: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl MetadataRecord {
    pub fn now(content_type: Option<&str>, locators: &[String], metadata: Map<String, Value>) -> MetadataRecord {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        MetadataRecord {
            ts,
            ct: content_type.map(String::from),
            loc: locators.to_vec(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub name: String,
    pub ct: Option<String>,
    /// Timestamp of the latest record.
    pub ts: u64,
    pub loc: Vec<String>,
    pub metadata: Map<String, Value>,
}

fn same_search(a: &Value, b: &Value) -> bool {
    a.get("engine") == b.get("engine") && a.get("tokens") == b.get("tokens")
}

/// Fold the log for a name into one view, oldest record first.
pub fn consolidate(name: &Name, records: &[MetadataRecord]) -> Option<Metadata> {
    let last = records.last()?;
    let mut loc: Vec<String> = vec![];
    let mut metadata = Map::new();
    let mut searches: Vec<Value> = vec![];
    let mut ct = None;
    for r in records {
        for l in r.loc.iter() {
            if !loc.contains(l) {
                loc.push(l.clone());
            }
        }
        if r.ct.is_some() {
            ct = r.ct.clone();
        }
        for (k, v) in r.metadata.iter() {
            let well_formed = v.get("engine").is_some() && v.get("tokens").is_some();
            if k == "search" && well_formed {
                if !searches.iter().any(|s| same_search(s, v)) {
                    searches.push(v.clone());
                }
            } else {
                metadata.insert(k.clone(), v.clone());
            }
        }
    }
    if !searches.is_empty() {
        metadata.insert(String::from("searches"), Value::Array(searches));
    }
    Some(Metadata {
        name: name.bare().to_wire_string(),
        ct,
        ts: last.ts,
        loc,
        metadata,
    })
}

/// Keeps objects and metadata logs under a root directory.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: &Path) -> Result<FileStore, Error> {
        fs::create_dir_all(root.join("ndo"))?;
        fs::create_dir_all(root.join("meta"))?;
        Ok(FileStore {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, kind: &str, name: &Name) -> PathBuf {
        self.root
            .join(kind)
            .join(name.algorithm().id())
            .join(name.digest_base64url())
    }

    pub fn object_path(&self, name: &Name) -> PathBuf {
        self.path_for("ndo", name)
    }

    fn metadata_path(&self, name: &Name) -> PathBuf {
        self.path_for("meta", name)
    }

    fn read_records(&self, name: &Name) -> Result<Vec<MetadataRecord>, Error> {
        let fp = self.metadata_path(name);
        let s = match fs::read_to_string(&fp) {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(vec![]);
            },
            Err(e) => {
                return Err(e.into());
            },
        };
        let mut records = vec![];
        for (i, line) in s.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(r) => records.push(r),
                Err(e) => {
                    warn!("skipping metadata line {} of {:?}: {}", i + 1, fp, e);
                },
            }
        }
        Ok(records)
    }
}

impl Storage for FileStore {
    fn get_object(&self, name: &Name) -> Result<Option<Vec<u8>>, Error> {
        match fs::read(self.object_path(name)) {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put_object(&self, name: &Name, octets: &[u8]) -> Result<(), Error> {
        let final_path = self.object_path(name);
        if final_path.exists() {
            return Err(Error::AlreadyExists(name.to_wire_string()));
        }
        let dir = final_path
            .parent()
            .ok_or_else(|| Error::Unsupported(format!("no parent for {:?}", final_path)))?;
        fs::create_dir_all(dir)?;

        let mut tempfile = NamedTempFile::new_in(dir)?;
        debug!("writing to tempfile {:?} size {}", tempfile.path(), octets.len());
        tempfile.write_all(octets)?;
        match tempfile.persist_noclobber(&final_path) {
            Ok(_) => {
                info!("stored {} bytes for {}", octets.len(), name);
                Ok(())
            },
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Err(Error::AlreadyExists(name.to_wire_string())),
            Err(e) => Err(e.error.into()),
        }
    }

    fn append_metadata(&self, name: &Name, record: &MetadataRecord) -> Result<(), Error> {
        let fp = self.metadata_path(name);
        if let Some(dir) = fp.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut f: File = OpenOptions::new().create(true).append(true).open(&fp)?;
        f.write_all(&line)?;
        debug!("appended metadata for {} to {:?}", name, fp);
        Ok(())
    }

    fn read_metadata(&self, name: &Name) -> Result<Option<Metadata>, Error> {
        let records = self.read_records(name)?;
        Ok(consolidate(name, &records))
    }
}
