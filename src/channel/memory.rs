//! In-process shared state channel
//!
//! Holds one JSON tree behind a lock and fans changes out to subscribers
//! through crossbeam queues. Each participant talks to it through its own
//! `MemoryClient`, which is what disconnect hooks and offline simulation are
//! keyed on. Used by the demo binary and the multi-participant tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crossbeam_channel::{unbounded, Sender};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::channel::{
    ChannelError, ChannelPath, ChannelValue, DisconnectAction, StateChannel, Subscription,
    SubscriptionId,
};

/// Identifier of one connected client
pub type ClientId = u64;

struct Subscriber {
    id: SubscriptionId,
    client: ClientId,
    path: ChannelPath,
    sender: Sender<Option<ChannelValue>>,
    last_sent: Option<ChannelValue>,
}

struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    hooks: HashMap<ClientId, Vec<(ChannelPath, DisconnectAction)>>,
    offline: HashSet<ClientId>,
    dropped: HashSet<ClientId>,
    write_counts: HashMap<ChannelPath, usize>,
    next_subscription: SubscriptionId,
    next_client: ClientId,
}

impl Inner {
    fn new() -> Self {
        Self {
            root: Value::Object(Map::new()),
            subscribers: Vec::new(),
            hooks: HashMap::new(),
            offline: HashSet::new(),
            dropped: HashSet::new(),
            write_counts: HashMap::new(),
            next_subscription: 1,
            next_client: 1,
        }
    }

    fn check_online(&self, client: ClientId) -> Result<(), ChannelError> {
        if self.offline.contains(&client) || self.dropped.contains(&client) {
            Err(ChannelError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn get(&self, path: &ChannelPath) -> Option<&Value> {
        lookup(&self.root, path)
    }

    /// Set (or remove, for `null`) the value at `path` without notifying
    fn set(&mut self, path: &ChannelPath, value: Value) {
        let segs: Vec<&str> = path.segments().collect();
        if segs.is_empty() {
            self.root = match value {
                Value::Null => Value::Object(Map::new()),
                other => other,
            };
            return;
        }

        if value.is_null() {
            remove_at(&mut self.root, &segs);
            return;
        }

        let mut node = &mut self.root;
        for seg in &segs[..segs.len() - 1] {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            let Some(obj) = node.as_object_mut() else {
                return;
            };
            node = obj
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Some(obj) = node.as_object_mut() {
            obj.insert(segs[segs.len() - 1].to_string(), value);
        }
    }

    /// Push the current value to every subscriber whose path overlaps `changed`
    fn notify(&mut self, changed: &ChannelPath) {
        let root = &self.root;
        self.subscribers.retain_mut(|sub| {
            if !sub.path.overlaps(changed) {
                return true;
            }
            let current = lookup(root, &sub.path).cloned();
            if sub.last_sent == current {
                return true;
            }
            sub.last_sent = current.clone();
            sub.sender.send(current).is_ok()
        });
    }

    fn count_write(&mut self, path: &ChannelPath) {
        *self.write_counts.entry(path.clone()).or_insert(0) += 1;
    }
}

fn lookup<'a>(root: &'a Value, path: &ChannelPath) -> Option<&'a Value> {
    let mut node = root;
    for seg in path.segments() {
        node = node.as_object()?.get(seg)?;
    }
    Some(node)
}

/// Remove a key and prune parents left empty
fn remove_at(node: &mut Value, segs: &[&str]) -> bool {
    let Some(obj) = node.as_object_mut() else {
        return false;
    };
    if segs.len() == 1 {
        obj.remove(segs[0]);
    } else if let Some(child) = obj.get_mut(segs[0]) {
        if remove_at(child, &segs[1..]) {
            obj.remove(segs[0]);
        }
    }
    obj.is_empty()
}

/// Server side of the in-process channel
#[derive(Clone)]
pub struct MemoryChannel {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new())),
        }
    }

    /// Open a new client connection
    pub fn connect(&self) -> MemoryClient {
        let mut inner = self.inner.lock();
        let id = inner.next_client;
        inner.next_client += 1;
        MemoryClient {
            id,
            inner: self.inner.clone(),
        }
    }

    /// Simulate a client connection dropping: its disconnect hooks run
    /// server-side and its subscriptions stop receiving.
    pub fn drop_connection(&self, client: ClientId) {
        let mut inner = self.inner.lock();
        if !inner.dropped.insert(client) {
            return;
        }
        let hooks = inner.hooks.remove(&client).unwrap_or_default();
        debug!("Client {} dropped, running {} disconnect hooks", client, hooks.len());
        inner.subscribers.retain(|s| s.client != client);
        for (path, action) in hooks {
            let value = match action {
                DisconnectAction::Set(v) => v,
                DisconnectAction::Remove => Value::Null,
            };
            inner.set(&path, value);
            inner.notify(&path);
        }
    }

    /// Toggle transient write failure for one client
    pub fn set_offline(&self, client: ClientId, offline: bool) {
        let mut inner = self.inner.lock();
        if offline {
            inner.offline.insert(client);
        } else {
            inner.offline.remove(&client);
        }
    }

    /// Number of client writes (write/update/remove) that targeted `path`
    pub fn write_count(&self, path: &ChannelPath) -> usize {
        self.inner.lock().write_counts.get(path).copied().unwrap_or(0)
    }

    /// Read bypassing any client (inspection in tests and the demo)
    pub fn peek(&self, path: &ChannelPath) -> Option<ChannelValue> {
        self.inner.lock().get(path).cloned()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

impl Default for MemoryChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's connection to a `MemoryChannel`
pub struct MemoryClient {
    id: ClientId,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryClient {
    pub fn id(&self) -> ClientId {
        self.id
    }
}

impl StateChannel for MemoryClient {
    fn write(&self, path: &ChannelPath, value: ChannelValue) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        inner.check_online(self.id)?;
        inner.count_write(path);
        inner.set(path, value);
        inner.notify(path);
        Ok(())
    }

    fn update(&self, path: &ChannelPath, fields: Map<String, ChannelValue>) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        inner.check_online(self.id)?;
        let mut targets = Vec::with_capacity(fields.len());
        for (key, value) in fields {
            let target = path.child(&key);
            if target == *path {
                return Err(ChannelError::InvalidPath(key));
            }
            targets.push((target, value));
        }

        inner.count_write(path);
        for (target, value) in &targets {
            inner.set(target, value.clone());
        }
        for (target, _) in &targets {
            inner.notify(target);
        }
        Ok(())
    }

    fn read(&self, path: &ChannelPath) -> Result<Option<ChannelValue>, ChannelError> {
        let inner = self.inner.lock();
        inner.check_online(self.id)?;
        Ok(inner.get(path).cloned())
    }

    fn subscribe(&self, path: &ChannelPath) -> Subscription {
        let mut inner = self.inner.lock();
        let id = inner.next_subscription;
        inner.next_subscription += 1;

        let (sender, receiver) = unbounded();
        let current = inner.get(path).cloned();
        // A receiver that is still in scope cannot be disconnected yet.
        let _ = sender.send(current.clone());

        let dropped = inner.dropped.contains(&self.id);
        if !dropped {
            inner.subscribers.push(Subscriber {
                id,
                client: self.id,
                path: path.clone(),
                sender,
                last_sent: current,
            });
        }
        Subscription::new(id, path.clone(), receiver)
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|s| s.id != subscription.id());
    }

    fn on_disconnect(&self, path: &ChannelPath, action: DisconnectAction) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        inner.check_online(self.id)?;
        let hooks = inner.hooks.entry(self.id).or_default();
        hooks.retain(|(p, _)| p != path);
        hooks.push((path.clone(), action));
        Ok(())
    }

    fn cancel_on_disconnect(&self, path: &ChannelPath) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock();
        inner.check_online(self.id)?;
        if let Some(hooks) = inner.hooks.get_mut(&self.id) {
            hooks.retain(|(p, _)| p != path);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(raw: &str) -> ChannelPath {
        ChannelPath::new(raw)
    }

    #[test]
    fn test_write_read_remove() {
        let server = MemoryChannel::new();
        let client = server.connect();

        client.write(&path("s/1/phase"), json!({"phase": "waiting"})).unwrap();
        assert_eq!(
            client.read(&path("s/1/phase")).unwrap(),
            Some(json!({"phase": "waiting"}))
        );
        assert_eq!(client.read(&path("s/1")).unwrap(), Some(json!({"phase": {"phase": "waiting"}})));

        client.remove(&path("s/1/phase")).unwrap();
        assert_eq!(client.read(&path("s/1/phase")).unwrap(), None);
        // Empty parents are pruned
        assert_eq!(client.read(&path("s")).unwrap(), None);
    }

    #[test]
    fn test_update_merges_fields() {
        let server = MemoryChannel::new();
        let client = server.connect();

        client.write(&path("s/roster"), json!({"a": 1})).unwrap();
        let mut fields = Map::new();
        fields.insert("b".into(), json!(2));
        fields.insert("c/d".into(), json!(3));
        client.update(&path("s/roster"), fields).unwrap();

        assert_eq!(
            client.read(&path("s/roster")).unwrap(),
            Some(json!({"a": 1, "b": 2, "c": {"d": 3}}))
        );
    }

    #[test]
    fn test_subscribe_delivers_current_then_changes() {
        let server = MemoryChannel::new();
        let writer = server.connect();
        let reader = server.connect();

        writer.write(&path("s/snapshot"), json!(1)).unwrap();
        let sub = reader.subscribe(&path("s/snapshot"));
        assert_eq!(sub.drain(), vec![Some(json!(1))]);

        writer.write(&path("s/snapshot"), json!(2)).unwrap();
        writer.write(&path("s/snapshot"), json!(3)).unwrap();
        assert_eq!(sub.drain(), vec![Some(json!(2)), Some(json!(3))]);
        assert!(sub.drain().is_empty());
    }

    #[test]
    fn test_identical_write_not_pushed_again() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let sub = client.subscribe(&path("s/x"));
        sub.drain();

        client.write(&path("s/x"), json!("v")).unwrap();
        client.write(&path("s/x"), json!("v")).unwrap();
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn test_parent_removal_notifies_child_subscribers() {
        let server = MemoryChannel::new();
        let client = server.connect();
        client.write(&path("session/a/snapshot"), json!({"seq": 1})).unwrap();

        let sub = client.subscribe(&path("session/a/snapshot"));
        sub.drain();

        client.remove(&path("session/a")).unwrap();
        assert_eq!(sub.drain(), vec![None]);
    }

    #[test]
    fn test_child_write_notifies_parent_subscriber() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let sub = client.subscribe(&path("s/roster"));
        assert_eq!(sub.drain(), vec![None]);

        client.write(&path("s/roster/p1"), json!({"name": "A"})).unwrap();
        assert_eq!(sub.drain(), vec![Some(json!({"p1": {"name": "A"}}))]);
    }

    #[test]
    fn test_disconnect_hooks_run_on_drop() {
        let server = MemoryChannel::new();
        let host = server.connect();
        let guest = server.connect();

        guest.write(&path("s/roster/g"), json!({"name": "guest"})).unwrap();
        guest.on_disconnect(&path("s/roster/g"), DisconnectAction::Remove).unwrap();
        guest
            .on_disconnect(&path("s/flag"), DisconnectAction::Set(json!(true)))
            .unwrap();
        guest.cancel_on_disconnect(&path("s/flag")).unwrap();

        let sub = host.subscribe(&path("s/roster"));
        sub.drain();

        server.drop_connection(guest.id());
        assert_eq!(sub.drain(), vec![None]);
        assert_eq!(host.read(&path("s/flag")).unwrap(), None);
        assert_eq!(guest.write(&path("s/x"), json!(1)), Err(ChannelError::Unavailable));
    }

    #[test]
    fn test_offline_write_fails_and_recovers() {
        let server = MemoryChannel::new();
        let client = server.connect();

        server.set_offline(client.id(), true);
        assert_eq!(client.write(&path("s/x"), json!(1)), Err(ChannelError::Unavailable));
        server.set_offline(client.id(), false);
        assert!(client.write(&path("s/x"), json!(1)).is_ok());
        assert_eq!(server.write_count(&path("s/x")), 1);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let sub = client.subscribe(&path("s/x"));
        assert_eq!(server.subscriber_count(), 1);
        drop(sub);

        client.write(&path("s/x"), json!(1)).unwrap();
        assert_eq!(server.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe() {
        let server = MemoryChannel::new();
        let client = server.connect();
        let sub = client.subscribe(&path("s/x"));
        client.unsubscribe(sub);
        assert_eq!(server.subscriber_count(), 0);
    }
}
