//! Per-group coordination state.
//!
//! Every handler here reads and mutates exactly one `GroupState` and decides
//! exactly one reply. Callers hold the group's lock for the whole call, so the
//! "has everyone arrived" checks are atomic with the updates that follow them.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::protocol::{Response, PRIMARY_SUB_ID_SUFFIX};

/// Arrival flag of one client at a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Arrived, still has to collect the barrier release.
    Pending,
    /// Has been handed the release.
    Delivered,
}

/// Coordination state of one named group.
#[derive(Debug)]
pub struct GroupState {
    name: String,
    expected_size: usize,
    completed: usize,
    /// client name -> hostname, in registration order.
    clients: IndexMap<String, String>,
    /// role -> clients holding it, in registration order.
    roles: IndexMap<String, Vec<String>>,
    /// messageID -> client -> arrival flag.
    sync_barriers: HashMap<String, IndexMap<String, Arrival>>,
    /// client -> messageID -> payload.
    mailboxes: HashMap<String, HashMap<String, Value>>,
    /// messageID -> sender -> payload, for wait-all completeness checks.
    wait_registry: HashMap<String, Map<String, Value>>,
    /// client -> result bundle.
    bundles: Map<String, Value>,
    pending_delay: u32,
    pacing_rounds: u32,
    evicted: bool,
}

/// Read-only view of a group, for logging and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub name: String,
    pub expected_size: usize,
    pub completed: usize,
    pub clients: Vec<String>,
    pub roles: IndexMap<String, Vec<String>>,
    pub open_barriers: Vec<String>,
    pub bundle_count: usize,
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// Merge `sender -> payload` into a mailbox slot, replacing a non-map slot.
fn merge_into(slot: &mut Value, sender: &str, payload: Value) {
    match slot {
        Value::Object(map) => {
            map.insert(sender.to_string(), payload);
        }
        other => {
            let mut map = Map::new();
            map.insert(sender.to_string(), payload);
            *other = Value::Object(map);
        }
    }
}

impl GroupState {
    pub fn new(name: impl Into<String>, expected_size: usize, pacing_rounds: u32) -> Self {
        Self {
            name: name.into(),
            expected_size,
            completed: 0,
            clients: IndexMap::new(),
            roles: IndexMap::new(),
            sync_barriers: HashMap::new(),
            mailboxes: HashMap::new(),
            wait_registry: HashMap::new(),
            bundles: Map::new(),
            pending_delay: pacing_rounds,
            pacing_rounds,
            evicted: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_member(&self, client: &str) -> bool {
        self.clients.contains_key(client)
    }

    /// The role `client` was registered under; empty if it named none.
    pub fn role_of(&self, client: &str) -> Option<&str> {
        self.roles
            .iter()
            .find(|(_, members)| members.iter().any(|m| m == client))
            .map(|(role, _)| role.as_str())
    }

    /// Add `client` on first contact. Membership is append-only.
    ///
    /// A client that names no role is filed under the empty role so that it
    /// still shows up in the `group_data` role table.
    ///
    /// Returns true if the client was not known before.
    pub fn register(&mut self, client: &str, hostname: Option<&str>, role: Option<&str>) -> bool {
        if self.clients.contains_key(client) {
            return false;
        }

        self.clients
            .insert(client.to_string(), hostname.unwrap_or_default().to_string());
        let role = role.unwrap_or_default();
        self.roles
            .entry(role.to_string())
            .or_default()
            .push(client.to_string());

        info!(
            group = %self.name,
            client,
            role,
            "registered client {} of {}",
            self.clients.len(),
            self.expected_size
        );
        true
    }

    /// `group_data`: wait until the group is fully populated, then hand out
    /// the client -> role table.
    pub fn group_data(&self) -> Response {
        if self.clients.len() != self.expected_size {
            info!(
                group = %self.name,
                "waiting for {} more clients",
                self.expected_size.saturating_sub(self.clients.len())
            );
            return Response::wait();
        }

        let mut roles = Map::new();
        for (role, members) in &self.roles {
            for client in members {
                roles.insert(client.clone(), Value::String(role.clone()));
            }
        }

        info!(group = %self.name, "group complete");
        Response::ack_with(json!({ "roles": roles }))
    }

    /// `clear_group`: count one completion. Every call counts, including
    /// repeats from the same client.
    pub fn clear_group(&mut self) -> Response {
        self.completed += 1;
        debug!(
            group = %self.name,
            "clear group: {} of {}",
            self.completed,
            self.clients.len()
        );
        Response::ack()
    }

    /// True once as many completions as clients have been counted.
    pub fn should_evict(&self) -> bool {
        self.completed >= self.clients.len()
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    pub fn is_evicted(&self) -> bool {
        self.evicted
    }

    /// `aggregate`: collect one result bundle.
    ///
    /// Only the primary contributor (sub-id ending in `.0`) is held back,
    /// first until every bundle is in and then for `pacing_rounds` extra
    /// polls; everyone else is acknowledged immediately.
    pub fn aggregate(&mut self, client: &str, bundle: Value, sub_id: &str) -> Response {
        self.bundles.insert(client.to_string(), bundle);

        if !sub_id.ends_with(PRIMARY_SUB_ID_SUFFIX) {
            debug!(group = %self.name, client, sub_id, "secondary bundle stored");
            return Response::ack();
        }

        if self.bundles.len() < self.expected_size {
            info!(
                group = %self.name,
                "holding primary: {} of {} bundles",
                self.bundles.len(),
                self.expected_size
            );
            self.pending_delay = self.pacing_rounds;
            return Response::wait();
        }

        if self.pending_delay > 0 {
            self.pending_delay -= 1;
            debug!(group = %self.name, remaining = self.pending_delay, "pacing primary");
            return Response::wait();
        }

        self.pending_delay = self.pacing_rounds;
        info!(group = %self.name, "releasing {} bundles to primary", self.bundles.len());
        Response::ack_with(json!({ "bundle": Value::Object(self.bundles.clone()) }))
    }

    /// `lava_sync`: rendezvous of every group member on `message_id`.
    ///
    /// The caller's arrival is recorded before the check, so the call that
    /// brings the count to the group size is released at once. Earlier
    /// arrivals are released on their next poll. The barrier is dropped
    /// once every arrival has been released, so the ID can be reused.
    pub fn lava_sync(&mut self, client: &str, message_id: &str, message: Option<Value>) -> Response {
        let payload = match message {
            Some(value) if !is_empty_payload(&value) => value,
            _ => Value::String(message_id.to_string()),
        };

        self.mailboxes
            .entry(client.to_string())
            .or_default()
            .insert(message_id.to_string(), payload.clone());

        let arrived = self.sync_barriers.entry(message_id.to_string()).or_default();
        arrived.entry(client.to_string()).or_insert(Arrival::Pending);

        let reply = if arrived.len() >= self.expected_size {
            arrived.insert(client.to_string(), Arrival::Delivered);
            debug!(group = %self.name, client, message_id, "sync released");
            Response::ack_with(payload)
        } else {
            info!(
                group = %self.name,
                client,
                message_id,
                "sync waiting: {} of {} arrived",
                arrived.len(),
                self.expected_size
            );
            Response::wait()
        };

        if arrived.values().all(|flag| *flag == Arrival::Delivered) {
            debug!(group = %self.name, message_id, "clearing sync barrier");
            self.sync_barriers.remove(message_id);
        }

        reply
    }

    /// `lava_wait`: return the caller's mailbox entry for `message_id`.
    pub fn lava_wait(&self, client: &str, message_id: &str) -> Response {
        match self
            .mailboxes
            .get(client)
            .and_then(|inbox| inbox.get(message_id))
        {
            Some(payload) => Response::ack_with(payload.clone()),
            None => {
                debug!(group = %self.name, client, message_id, "message not yet seen");
                Response::wait()
            }
        }
    }

    /// `lava_wait_all`: wait until the targeted clients have all sent
    /// `message_id`.
    ///
    /// Without `wait_role` every group member is targeted. With `wait_role`
    /// the members of the caller's own role are iterated, and the loop
    /// acknowledges early as soon as the first member of `wait_role` has
    /// sent. The caller's role is `role` if given, otherwise the role it
    /// registered under.
    pub fn lava_wait_all(
        &self,
        client: &str,
        message_id: &str,
        wait_role: Option<&str>,
        role: Option<&str>,
    ) -> Response {
        let Some(data) = self.wait_registry.get(message_id) else {
            debug!(group = %self.name, message_id, "no sender yet");
            return Response::wait();
        };
        let complete = || Response::ack_with(Value::Object(data.clone()));

        let Some(wait_role) = wait_role else {
            if let Some(missing) = self.clients.keys().find(|c| !data.contains_key(*c)) {
                debug!(group = %self.name, message_id, missing = %missing, "wait-all pending");
                return Response::wait();
            }
            return complete();
        };

        let expected = self
            .roles
            .get(wait_role)
            .and_then(|members| members.first());
        let iterated: &[String] = role
            .or_else(|| self.role_of(client))
            .and_then(|r| self.roles.get(r))
            .map(Vec::as_slice)
            .unwrap_or_default();

        for member in iterated {
            if expected.is_some_and(|first| data.contains_key(first)) {
                debug!(group = %self.name, message_id, wait_role, "first of role has sent");
                return complete();
            }
            if !data.contains_key(member) {
                debug!(group = %self.name, message_id, missing = %member, "wait-all pending");
                return Response::wait();
            }
        }

        complete()
    }

    /// `lava_send`: broadcast `sender -> message` into every member's
    /// mailbox and the wait registry. Never waits.
    pub fn lava_send(&mut self, sender: &str, message_id: &str, message: Option<Value>) -> Response {
        let payload = message.unwrap_or_else(|| Value::Object(Map::new()));

        for member in self.clients.keys() {
            let slot = self
                .mailboxes
                .entry(member.clone())
                .or_default()
                .entry(message_id.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            merge_into(slot, sender, payload.clone());
        }

        self.wait_registry
            .entry(message_id.to_string())
            .or_default()
            .insert(sender.to_string(), payload);

        info!(
            group = %self.name,
            sender,
            message_id,
            "broadcast to {} clients",
            self.clients.len()
        );
        Response::ack()
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        let mut open_barriers: Vec<String> = self.sync_barriers.keys().cloned().collect();
        open_barriers.sort();

        GroupSnapshot {
            name: self.name.clone(),
            expected_size: self.expected_size,
            completed: self.completed,
            clients: self.clients.keys().cloned().collect(),
            roles: self.roles.clone(),
            open_barriers,
            bundle_count: self.bundles.len(),
        }
    }
}
