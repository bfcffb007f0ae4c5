// ── Home domain types ──
//
// The merged `home → rooms → modules` tree produced once per poll cycle.
// Device types are opaque strings from the cloud, never a closed enum, so a
// new device category flows through without code changes.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};

/// Id and name of the synthetic room holding modules without a real room.
pub const GLOBAL_ROOM_ID: &str = "global";

/// Modules are only unique per device type, so they are keyed by both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ModuleKey {
    pub module_type: String,
    pub id: String,
}

impl ModuleKey {
    pub fn new(module_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            module_type: module_type.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.module_type, self.id)
    }
}

/// A physical device with its live attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Module {
    pub id: String,
    /// Device category code as sent by the cloud (e.g. `NXO`).
    #[serde(rename = "type")]
    pub module_type: String,
    /// Display name; the raw id until the topology feed names it.
    pub name: String,
    /// Every status field except `id` and `type`, verbatim.
    pub attributes: Map<String, Value>,
}

impl Module {
    pub fn key(&self) -> ModuleKey {
        ModuleKey::new(&self.module_type, &self.id)
    }
}

/// A named location with ambient measurements and the modules it owns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Room {
    pub id: String,
    pub name: String,
    /// Every status field except `id`, verbatim.
    pub measurements: Map<String, Value>,
    pub modules: Vec<Module>,
}

impl Room {
    /// A room named after its id, with no measurements or modules yet.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            measurements: Map::new(),
            modules: Vec::new(),
        }
    }

    /// The synthetic room for modules without a (known) room.
    pub fn global() -> Self {
        Self::new(GLOBAL_ROOM_ID)
    }

    pub fn is_global(&self) -> bool {
        self.id == GLOBAL_ROOM_ID
    }
}

/// Merged view of one home. `global` is always the first room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HomeTree {
    pub home_id: String,
    pub rooms: IndexMap<String, Room>,
}

impl HomeTree {
    /// A tree holding only the empty `global` room.
    pub fn new(home_id: impl Into<String>) -> Self {
        let mut rooms = IndexMap::new();
        rooms.insert(GLOBAL_ROOM_ID.to_owned(), Room::global());
        Self {
            home_id: home_id.into(),
            rooms,
        }
    }

    pub fn room(&self, id: &str) -> Option<&Room> {
        self.rooms.get(id)
    }

    /// Every module together with the room that owns it.
    pub fn modules(&self) -> impl Iterator<Item = (&Room, &Module)> {
        self.rooms
            .values()
            .flat_map(|room| room.modules.iter().map(move |module| (room, module)))
    }

    pub fn module_count(&self) -> usize {
        self.rooms.values().map(|room| room.modules.len()).sum()
    }

    /// The room owning `key`, if any.
    pub fn room_of(&self, key: &ModuleKey) -> Option<&Room> {
        self.modules()
            .find(|(_, module)| module.module_type == key.module_type && module.id == key.id)
            .map(|(room, _)| room)
    }
}
