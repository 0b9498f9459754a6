//! Test helpers for driving whole migration runs in memory
//!
//! `FakeStateBackend` keeps one "remote" state per directory and performs
//! real moves between the local state files in a `MockFileSystem`, so runs
//! can be checked end to end (including re-runs). Serials are left alone by
//! the fake so tests can count the tool's own bumps.

#![cfg(test)]

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::backend::{CloudApi, ImportStatus, MoveRequest, StateBackend};
use crate::migration::imports::Direction;
use crate::state::{ResourceAddress, ResourceRecord, StateDocument};
use crate::traits::{FileSystem, MockFileSystem};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Move(String, String),
    Push(PathBuf),
    Import(String, String),
}

pub struct FakeStateBackend {
    fs: Arc<MockFileSystem>,
    remote: Mutex<HashMap<PathBuf, String>>,
    initial: Mutex<HashMap<PathBuf, String>>,
    events: Mutex<Vec<Event>>,
    failing_moves: Mutex<HashSet<String>>,
    failing_pushes: Mutex<HashSet<PathBuf>>,
}

impl FakeStateBackend {
    pub fn new(fs: Arc<MockFileSystem>) -> Self {
        Self {
            fs,
            remote: Mutex::new(HashMap::new()),
            initial: Mutex::new(HashMap::new()),
            events: Mutex::new(Vec::new()),
            failing_moves: Mutex::new(HashSet::new()),
            failing_pushes: Mutex::new(HashSet::new()),
        }
    }

    /// Set the remote state of a directory; the first value is kept as its initial state
    pub fn set_remote(&self, dir: &Path, state: &str) {
        self.remote
            .lock()
            .unwrap()
            .insert(dir.to_path_buf(), state.to_string());
        self.initial
            .lock()
            .unwrap()
            .entry(dir.to_path_buf())
            .or_insert_with(|| state.to_string());
    }

    pub fn remote(&self, dir: &Path) -> Option<String> {
        self.remote.lock().unwrap().get(dir).cloned()
    }

    pub fn initial(&self, dir: &Path) -> Option<String> {
        self.initial.lock().unwrap().get(dir).cloned()
    }

    pub fn fail_move(&self, from: &str) {
        self.failing_moves.lock().unwrap().insert(from.to_string());
    }

    pub fn fail_push(&self, dir: &Path) {
        self.failing_pushes.lock().unwrap().insert(dir.to_path_buf());
    }

    /// Successful moves as (from, to)
    pub fn moves(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Move(from, to) => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect()
    }

    /// Directories whose state was pushed, in order
    pub fn pushes(&self) -> Vec<PathBuf> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Push(dir) => Some(dir.clone()),
                _ => None,
            })
            .collect()
    }

    /// Imports as (address, id)
    pub fn imports(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Import(address, id) => Some((address.clone(), id.clone())),
                _ => None,
            })
            .collect()
    }

    /// Whether every import happened after the last push
    pub fn imported_after_push(&self) -> bool {
        let events = self.events.lock().unwrap();
        let last_push = events.iter().rposition(|e| matches!(e, Event::Push(_)));
        let first_import = events.iter().position(|e| matches!(e, Event::Import(..)));

        match (last_push, first_import) {
            (Some(push), Some(import)) => push < import,
            (_, None) => true,
            (None, Some(_)) => false,
        }
    }

    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl StateBackend for FakeStateBackend {
    fn init(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn pull(&self, dir: &Path) -> Result<String> {
        self.remote(dir)
            .with_context(|| format!("No state for {}", dir.display()))
    }

    fn push(&self, dir: &Path, state_file: &Path) -> Result<()> {
        if self.failing_pushes.lock().unwrap().contains(dir) {
            bail!("simulated push failure");
        }

        let text = self.fs.read_to_string(state_file)?;
        self.remote.lock().unwrap().insert(dir.to_path_buf(), text);
        self.record(Event::Push(dir.to_path_buf()));
        Ok(())
    }

    fn move_resource(&self, request: &MoveRequest) -> Result<()> {
        if self.failing_moves.lock().unwrap().contains(&request.from) {
            bail!("simulated move failure");
        }

        let fs = &*self.fs;
        let mut old = StateDocument::load(fs, &request.old_state);
        let mut new = StateDocument::load(fs, &request.new_state);
        let from = ResourceAddress::parse(&request.from).context("Invalid source address")?;
        let to = ResourceAddress::parse(&request.to).context("Invalid target address")?;

        if new.addresses().contains(&to) {
            bail!("Target {} already exists", to);
        }

        let index = old
            .resources
            .iter()
            .position(|r| r.is_at(&from))
            .with_context(|| format!("No resource at {}", from))?;
        let record = &mut old.resources[index];

        // A record without instances moves as a whole
        let instance = if record.instances.is_empty() {
            None
        } else {
            let position = record
                .instances
                .iter()
                .position(|i| i.index_key == from.key)
                .with_context(|| format!("No instance at {}", from))?;
            let mut instance = record.instances.remove(position);
            instance.index_key = to.key.clone();
            Some(instance)
        };
        if record.instances.is_empty() {
            old.resources.remove(index);
        }

        match new.resources.iter_mut().find(|r| r.is_at(&to)) {
            Some(existing) => existing.instances.extend(instance),
            None => {
                let module = to.module_path();
                new.resources.push(ResourceRecord {
                    module: (!module.is_empty()).then_some(module),
                    mode: to.mode,
                    resource_type: to.resource_type.clone(),
                    name: to.name.clone(),
                    instances: instance.into_iter().collect(),
                    extra: Map::new(),
                });
            }
        }

        old.save(fs, &request.old_state)?;
        new.save(fs, &request.new_state)?;
        self.record(Event::Move(request.from.clone(), request.to.clone()));
        Ok(())
    }

    fn import(&self, _dir: &Path, address: &str, id: &str) -> Result<ImportStatus> {
        self.record(Event::Import(address.to_string(), id.to_string()));
        Ok(ImportStatus::Imported)
    }
}

/// Cloud API that records revocations
#[derive(Default)]
pub struct FakeCloud {
    revoked: Mutex<Vec<String>>,
    failing: Mutex<bool>,
}

impl FakeCloud {
    pub fn fail(&self) {
        *self.failing.lock().unwrap() = true;
    }

    /// Revoked rules as `group/rule`
    pub fn revoked(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

impl CloudApi for FakeCloud {
    fn revoke_security_group_rule(
        &self,
        group_id: &str,
        rule_id: &str,
        _direction: Direction,
    ) -> Result<()> {
        if *self.failing.lock().unwrap() {
            bail!("UnauthorizedOperation");
        }
        self.revoked
            .lock()
            .unwrap()
            .push(format!("{}/{}", group_id, rule_id));
        Ok(())
    }
}

/// JSON for one managed resource record
pub fn resource(
    module: Option<&str>,
    resource_type: &str,
    name: &str,
    instances: Vec<Value>,
) -> Value {
    let mut record = json!({
        "mode": "managed",
        "type": resource_type,
        "name": name,
        "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
        "instances": instances,
    });
    if let Some(module) = module {
        record["module"] = json!(module);
    }
    record
}

/// A complete state document as pulled from a backend
pub fn state_json(serial: u64, resources: Vec<Value>) -> String {
    serde_json::to_string_pretty(&json!({
        "version": 4,
        "terraform_version": "1.5.7",
        "serial": serial,
        "lineage": "3f1c2a8e-5b6d-4e7f-8a9b-0c1d2e3f4a5b",
        "outputs": {},
        "resources": resources,
    }))
    .unwrap()
}

mod tests {
    use super::*;

    #[test]
    fn test_fake_move_carries_instance_to_new_key() {
        let fs = Arc::new(MockFileSystem::new());
        let backend = FakeStateBackend::new(fs.clone());
        let old_path = PathBuf::from("/w/old.tfstate");
        let new_path = PathBuf::from("/w/new.tfstate");
        fs.write(
            &old_path,
            &state_json(
                1,
                vec![resource(
                    Some("module.operator[0]"),
                    "helm_release",
                    "operator",
                    vec![json!({ "attributes": { "id": "op" } })],
                )],
            ),
        )
        .unwrap();

        backend
            .move_resource(&MoveRequest {
                working_dir: PathBuf::from("/w"),
                old_state: old_path.clone(),
                new_state: new_path.clone(),
                from: "module.operator[0].helm_release.operator".to_string(),
                to: "module.operator.helm_release.operator".to_string(),
            })
            .unwrap();

        let old = StateDocument::load(&*fs, &old_path);
        let new = StateDocument::load(&*fs, &new_path);
        assert!(old.resources.is_empty());
        assert_eq!(
            new.addresses()[0].to_string(),
            "module.operator.helm_release.operator"
        );
        assert_eq!(new.resources[0].instances[0].attributes["id"], json!("op"));
    }
}
