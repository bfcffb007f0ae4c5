// ── Reconciler ──
//
// Merges the live status feed with the naming/topology feed into one
// `HomeTree`. Pure and deterministic: the same feed pair always yields the
// same tree.
//
// Placement rules:
//   - a topology module without a status entry is skipped
//   - a topology module whose room is unknown to the status feed goes to `global`
//   - a module named twice is placed once, at its first occurrence
//   - a status module the topology never names goes to `global`, named by id
//   - a status room the topology never names keeps its id as name
//   - a status room with the `global` id (or listed twice) merges its
//     measurements into the existing room, later values winning

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;
use velux_api::{RawHome, RawModuleStatus, RawStatus};

use crate::model::{GLOBAL_ROOM_ID, HomeTree, Module, ModuleKey, Room};

/// Entries that did not line up between the two feeds. Expected while a
/// device is being added or removed, so it is reported and never raised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Topology modules with no live status yet.
    pub unknown_modules: Vec<ModuleKey>,
    /// Topology modules whose `room_id` is not a status room.
    pub orphaned_modules: Vec<ModuleKey>,
    /// Status modules the topology does not name.
    pub unnamed_modules: Vec<ModuleKey>,
    /// Topology rooms with no live status.
    pub unknown_rooms: Vec<String>,
    /// Topology modules listed more than once.
    pub duplicate_modules: Vec<ModuleKey>,
}

impl MergeReport {
    pub fn is_clean(&self) -> bool {
        self.unknown_modules.is_empty()
            && self.orphaned_modules.is_empty()
            && self.unnamed_modules.is_empty()
            && self.unknown_rooms.is_empty()
            && self.duplicate_modules.is_empty()
    }
}

/// Output of [`reconcile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    pub tree: HomeTree,
    pub report: MergeReport,
}

/// Merge one home's status and topology feeds.
pub fn reconcile(status: &RawStatus, topology: &RawHome) -> Reconciled {
    let mut report = MergeReport::default();

    let status_modules: HashMap<ModuleKey, &RawModuleStatus> = status
        .modules
        .iter()
        .map(|m| (ModuleKey::new(&m.module_type, &m.id), m))
        .collect();

    let mut rooms: IndexMap<String, Room> = IndexMap::with_capacity(status.rooms.len() + 1);
    rooms.insert(GLOBAL_ROOM_ID.to_owned(), Room::global());
    for raw in &status.rooms {
        if let Some(room) = rooms.get_mut(&raw.id) {
            debug!(room_id = %raw.id, "status room listed twice or named global, merging");
            room.measurements.extend(raw.measurements.clone());
            continue;
        }
        rooms.insert(
            raw.id.clone(),
            Room {
                measurements: raw.measurements.clone(),
                ..Room::new(&raw.id)
            },
        );
    }

    // ── Modules named by the topology ────────────────────────────────
    let mut placed: HashSet<ModuleKey> = HashSet::with_capacity(status_modules.len());
    for named in &topology.modules {
        let key = ModuleKey::new(&named.module_type, &named.id);

        let Some(live) = status_modules.get(&key) else {
            debug!(module = %key, "module has no live status, skipping");
            report.unknown_modules.push(key);
            continue;
        };
        if placed.contains(&key) {
            debug!(module = %key, "module named twice, keeping first");
            report.duplicate_modules.push(key);
            continue;
        }

        let room_id = match named.room_id.as_deref() {
            Some(id) if id != GLOBAL_ROOM_ID && rooms.contains_key(id) => id,
            Some(id) => {
                debug!(module = %key, room_id = id, "module room unknown, placing in global");
                report.orphaned_modules.push(key.clone());
                GLOBAL_ROOM_ID
            }
            None => GLOBAL_ROOM_ID,
        };

        let module = Module {
            id: live.id.clone(),
            module_type: live.module_type.clone(),
            name: named.name.clone().unwrap_or_else(|| live.id.clone()),
            attributes: live.attributes.clone(),
        };
        if let Some(room) = rooms.get_mut(room_id) {
            room.modules.push(module);
        }
        placed.insert(key);
    }

    // ── Live modules the topology never named ────────────────────────
    for live in &status.modules {
        let key = ModuleKey::new(&live.module_type, &live.id);
        if placed.contains(&key) {
            continue;
        }
        debug!(module = %key, "module not named by topology, placing in global");
        if let Some(global) = rooms.get_mut(GLOBAL_ROOM_ID) {
            global.modules.push(Module {
                id: live.id.clone(),
                module_type: live.module_type.clone(),
                name: live.id.clone(),
                attributes: live.attributes.clone(),
            });
        }
        report.unnamed_modules.push(key.clone());
        placed.insert(key);
    }

    // ── Room names ───────────────────────────────────────────────────
    for named in &topology.rooms {
        match rooms.get_mut(&named.id) {
            Some(room) if !room.is_global() => {
                if let Some(name) = &named.name {
                    room.name.clone_from(name);
                }
            }
            _ => report.unknown_rooms.push(named.id.clone()),
        }
    }

    let home_id = if status.id.is_empty() {
        topology.id.clone()
    } else {
        status.id.clone()
    };

    Reconciled {
        tree: HomeTree { home_id, rooms },
        report,
    }
}
