//! # Service Tree
//!
//! A namespace of services rooted at `$`. Service paths are dot-joined names
//! (`$.user.admin`); a reply path appends `:name` (`$.user:sayHello`).
//!
//! ## Mount Rules
//!
//! Checked in this order, all failures are Reply errors:
//! 1. The parent path exists.
//! 2. The new node is no deeper than the configured maximum.
//! 3. The new path is free. Duplicates report both declaration sites.
//! 4. Service names match `[_0-9a-zA-Z]+`, reply names `[_a-zA-Z][_0-9a-zA-Z]*`.
//!
//! A `mount` call either adds its whole subtree or nothing.

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Arc;

use crate::Error;
use crate::ROOT_PATH;
use crate::ReplyCache;
use crate::Result;
use crate::reply::FromValues;
use crate::reply::IntoReply;
use crate::reply::Reply;
use crate::reply::ReplyMeta;

fn origin_of(location: &Location<'_>) -> String {
    format!("{}:{}", location.file(), location.line())
}

/// True for `[_0-9a-zA-Z]+`.
pub fn is_valid_service_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b == b'_' || b.is_ascii_alphanumeric())
}

/// True for `[_a-zA-Z][_0-9a-zA-Z]*`.
pub fn is_valid_reply_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    match bytes.next() {
        Some(b) if b == b'_' || b.is_ascii_alphabetic() => bytes.all(|b| b == b'_' || b.is_ascii_alphanumeric()),
        _ => false,
    }
}

/// A service declaration: a name, its replies and its child services.
pub struct Service {
    name: String,
    origin: String,
    children: Vec<Service>,
    replies: Vec<ReplyMeta>,
}

impl Service {
    #[track_caller]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            origin: origin_of(Location::caller()),
            children: Vec::new(),
            replies: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_child_service(mut self, child: Service) -> Self {
        self.children.push(child);
        self
    }

    /// Declares a reply. The closure's parameter list fixes the argument kinds.
    #[track_caller]
    pub fn reply<Args: FromValues, F: IntoReply<Args>>(mut self, name: &str, f: F) -> Self {
        let origin = origin_of(Location::caller());
        self.replies.push(ReplyMeta::new(name, f, origin));
        self
    }
}

pub(crate) struct ServiceNode {
    pub depth: usize,
    pub origin: String,
}

/// Mounted services and replies.
pub(crate) struct Registry {
    services: HashMap<String, ServiceNode>,
    replies: HashMap<String, Arc<Reply>>,
}

#[derive(Default)]
struct Staged {
    services: Vec<(String, ServiceNode)>,
    replies: Vec<Reply>,
}

impl Staged {
    fn service(&self, path: &str) -> Option<&ServiceNode> {
        self.services.iter().find(|(p, _)| p == path).map(|(_, n)| n)
    }

    fn reply(&self, path: &str) -> Option<&Reply> {
        self.replies.iter().find(|r| r.path == path)
    }
}

impl Registry {
    pub fn new() -> Self {
        let mut services = HashMap::new();
        services.insert(ROOT_PATH.to_string(), ServiceNode { depth: 0, origin: String::new() });
        Self { services, replies: HashMap::new() }
    }

    /// Mounts `service` under `parent`, attaching fast paths from `cache`.
    pub fn mount(&mut self, parent: &str, service: &Service, max_node_depth: usize, cache: Option<&ReplyCache>) -> Result<()> {
        let mut staged = Staged::default();
        self.stage(parent, service, max_node_depth, &mut staged)?;

        for (path, node) in staged.services {
            self.services.insert(path, node);
        }
        for mut reply in staged.replies {
            reply.fast = cache.and_then(|c| c.get(&reply.kind_string));
            self.replies.insert(reply.path.clone(), Arc::new(reply));
        }
        Ok(())
    }

    fn stage(&self, parent: &str, service: &Service, max_node_depth: usize, staged: &mut Staged) -> Result<()> {
        let Some(parent_node) = self.services.get(parent).or_else(|| staged.service(parent)) else {
            return Err(Error::reply(format!("rpc-server: mount parent path {} is not found", parent)));
        };
        let depth = parent_node.depth + 1;
        let path = format!("{}.{}", parent, service.name);
        if depth > max_node_depth {
            return Err(Error::reply(format!(
                "rpc-server: mount {}: service depth({}) is overflow. limited({})",
                path, depth, max_node_depth
            )));
        }
        if let Some(existing) = self.services.get(&path).or_else(|| staged.service(&path)) {
            return Err(Error::reply(format!("rpc-server: duplicated service path {}", path))
                .with_debug(format!("current:\n{}", service.origin))
                .with_debug(format!("conflict:\n{}", existing.origin)));
        }
        if !is_valid_service_name(&service.name) {
            return Err(Error::reply(format!("rpc-server: service name \"{}\" is illegal", service.name))
                .with_debug(&service.origin));
        }
        staged.services.push((path.clone(), ServiceNode { depth, origin: service.origin.clone() }));

        for meta in &service.replies {
            if !is_valid_reply_name(&meta.name) {
                return Err(Error::reply(format!("rpc-server: reply name \"{}\" is illegal", meta.name))
                    .with_debug(&meta.origin));
            }
            let reply = Reply::mount(&path, meta);
            let existing = self.replies.get(&reply.path).map(|r| r.origin.clone());
            if let Some(origin) = existing.or_else(|| staged.reply(&reply.path).map(|r| r.origin.clone())) {
                return Err(Error::reply(format!("rpc-server: duplicated reply path {}", reply.path))
                    .with_debug(format!("current:\n{}", meta.origin))
                    .with_debug(format!("conflict:\n{}", origin)));
            }
            staged.replies.push(reply);
        }

        for child in &service.children {
            self.stage(&path, child, max_node_depth, staged)?;
        }
        Ok(())
    }

    pub fn replies(&self) -> &HashMap<String, Arc<Reply>> {
        &self.replies
    }
}
