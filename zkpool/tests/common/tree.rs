//! In-memory node tree with the ensemble's write semantics.
//!
//! Every mutation returns the watch events it triggers so the fake server
//! can deliver them. Multi-ops run against a clone and only replace the
//! tree when every sub-operation succeeded.

use std::collections::{BTreeSet, HashMap};

use zkpool::{EventType, Op, OpResult, Stat, Version};
use zkpool_proto::{Acl, CreateMode, ErrorCode, MultiOp, MultiResponse, MAX_DATA_SIZE};

/// Watch events a mutation produced, in order.
pub type Events = Vec<(EventType, String)>;

#[derive(Debug, Clone)]
pub struct Node {
    pub data: Vec<u8>,
    pub stat: Stat,
    pub children: BTreeSet<String>,
}

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: HashMap<String, Node>,
    zxid: i64,
    clock_ms: i64,
}

pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(index) => &path[..index],
    }
}

fn name_of(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

impl Default for Tree {
    fn default() -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            "/".to_string(),
            Node {
                data: Vec::new(),
                stat: Stat::default(),
                children: BTreeSet::new(),
            },
        );
        Self {
            nodes,
            zxid: 0,
            clock_ms: 1_700_000_000_000,
        }
    }
}

impl Tree {
    pub fn zxid(&self) -> i64 {
        self.zxid
    }

    pub fn get(&self, path: &str) -> Option<&Node> {
        self.nodes.get(path)
    }

    fn next_zxid(&mut self) -> i64 {
        self.zxid += 1;
        self.clock_ms += 1;
        self.zxid
    }

    pub fn create(
        &mut self,
        path: &str,
        data: &[u8],
        acl: &[Acl],
        mode: CreateMode,
        session: i64,
    ) -> Result<(String, Stat, Events), ErrorCode> {
        if data.len() > MAX_DATA_SIZE {
            return Err(ErrorCode::BadArguments);
        }
        if acl.is_empty() {
            return Err(ErrorCode::InvalidAcl);
        }
        let parent_path = parent_of(path).to_string();
        let parent = self.nodes.get(&parent_path).ok_or(ErrorCode::NoNode)?;
        if parent.stat.ephemeral_owner != 0 {
            return Err(ErrorCode::NoChildrenForEphemerals);
        }
        let path = if mode.is_sequential() {
            format!("{path}{:010}", parent.stat.cversion)
        } else {
            path.to_string()
        };
        if self.nodes.contains_key(&path) {
            return Err(ErrorCode::NodeExists);
        }

        let zxid = self.next_zxid();
        let stat = Stat {
            czxid: zxid,
            mzxid: zxid,
            ctime: self.clock_ms,
            mtime: self.clock_ms,
            ephemeral_owner: if mode.is_ephemeral() { session } else { 0 },
            data_length: data.len() as i32,
            pzxid: zxid,
            ..Stat::default()
        };
        self.nodes.insert(
            path.clone(),
            Node {
                data: data.to_vec(),
                stat,
                children: BTreeSet::new(),
            },
        );
        self.link_child(&parent_path, &path, zxid, true);
        let events = vec![
            (EventType::NodeCreated, path.clone()),
            (EventType::NodeChildrenChanged, parent_path),
        ];
        Ok((path, stat, events))
    }

    pub fn set(&mut self, path: &str, data: &[u8], version: Version) -> Result<(Stat, Events), ErrorCode> {
        if data.len() > MAX_DATA_SIZE {
            return Err(ErrorCode::BadArguments);
        }
        let current = self.nodes.get(path).ok_or(ErrorCode::NoNode)?.stat.version;
        if !version.matches(current) {
            return Err(ErrorCode::BadVersion);
        }
        let zxid = self.next_zxid();
        let clock = self.clock_ms;
        let node = self.nodes.get_mut(path).ok_or(ErrorCode::NoNode)?;
        node.data = data.to_vec();
        node.stat.version += 1;
        node.stat.mzxid = zxid;
        node.stat.mtime = clock;
        node.stat.data_length = data.len() as i32;
        Ok((node.stat, vec![(EventType::NodeDataChanged, path.to_string())]))
    }

    pub fn delete(&mut self, path: &str, version: Version) -> Result<Events, ErrorCode> {
        if path == "/" {
            return Err(ErrorCode::BadArguments);
        }
        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        if !version.matches(node.stat.version) {
            return Err(ErrorCode::BadVersion);
        }
        if !node.children.is_empty() {
            return Err(ErrorCode::NotEmpty);
        }
        let zxid = self.next_zxid();
        self.nodes.remove(path);
        let parent_path = parent_of(path).to_string();
        self.link_child(&parent_path, path, zxid, false);
        Ok(vec![
            (EventType::NodeDeleted, path.to_string()),
            (EventType::NodeChildrenChanged, parent_path),
        ])
    }

    pub fn check(&self, path: &str, version: Version) -> Result<(), ErrorCode> {
        let node = self.nodes.get(path).ok_or(ErrorCode::NoNode)?;
        if !version.matches(node.stat.version) {
            return Err(ErrorCode::BadVersion);
        }
        Ok(())
    }

    fn link_child(&mut self, parent: &str, child: &str, zxid: i64, add: bool) {
        if let Some(parent) = self.nodes.get_mut(parent) {
            let name = name_of(child).to_string();
            if add {
                parent.children.insert(name);
            } else {
                parent.children.remove(&name);
            }
            parent.stat.cversion += 1;
            parent.stat.pzxid = zxid;
            parent.stat.num_children = parent.children.len() as i32;
        }
    }

    /// Delete every ephemeral node owned by `session`.
    pub fn drop_ephemerals(&mut self, session: i64) -> Events {
        let mut owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.stat.ephemeral_owner == session)
            .map(|(path, _)| path.clone())
            .collect();
        owned.sort();
        owned
            .iter()
            .filter_map(|path| self.delete(path, Version::Any).ok())
            .flatten()
            .collect()
    }

    /// Apply a batch atomically.
    ///
    /// On failure the tree is untouched; the response carries `ok` for the
    /// sub-operations before the culprit and `runtime_inconsistency` after it.
    pub fn multi(&mut self, txn: &MultiOp, session: i64) -> (MultiResponse, Result<Events, ErrorCode>) {
        let mut scratch = self.clone();
        let mut results = Vec::new();
        let mut events = Vec::new();
        for (index, op) in txn.ops().iter().enumerate() {
            let outcome = match op {
                Op::Create {
                    path,
                    data,
                    acl,
                    mode,
                } => scratch
                    .create(path, data, acl, *mode, session)
                    .map(|(path, stat, fired)| {
                        events.extend(fired);
                        OpResult::Create {
                            path,
                            stat: Some(stat),
                        }
                    }),
                Op::SetData {
                    path,
                    data,
                    version,
                } => scratch.set(path, data, *version).map(|(stat, fired)| {
                    events.extend(fired);
                    OpResult::SetData { stat }
                }),
                Op::Delete { path, version } => scratch.delete(path, *version).map(|fired| {
                    events.extend(fired);
                    OpResult::Delete
                }),
                Op::Check { path, version } => scratch.check(path, *version).map(|()| OpResult::Check),
            };
            match outcome {
                Ok(result) => results.push(result),
                Err(code) => {
                    let results = (0..txn.len())
                        .map(|i| OpResult::Error {
                            code: match i.cmp(&index) {
                                std::cmp::Ordering::Less => ErrorCode::Ok,
                                std::cmp::Ordering::Equal => code,
                                std::cmp::Ordering::Greater => ErrorCode::RuntimeInconsistency,
                            },
                        })
                        .collect();
                    return (MultiResponse { results }, Err(code));
                }
            }
        }
        *self = scratch;
        (MultiResponse { results }, Ok(events))
    }
}
