// ── Metrics publisher ──
//
// Holds the last successfully reconciled tree and renders it in the
// Prometheus text exposition format. A failed cycle never clears the tree:
// the endpoint keeps serving stale values while `<prefix>_up` drops to 0.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::config::DEFAULT_METRIC_PREFIX;
use crate::model::{HomeTree, Module, Room};

/// What the endpoint serves at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Last successfully reconciled tree, if any cycle has succeeded yet.
    pub tree: Option<Arc<HomeTree>>,
    /// Whether the most recent cycle succeeded.
    pub up: bool,
    pub last_success: Option<DateTime<Utc>>,
    /// Failed cycles since start.
    pub failures_total: u64,
}

/// Shared between the poll loop (writer) and the HTTP handler (reader).
#[derive(Debug)]
pub struct MetricsState {
    prefix: String,
    snapshot: ArcSwap<Snapshot>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_PREFIX)
    }
}

impl MetricsState {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: sanitize_name(&prefix.into()),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Replace the served tree after a successful cycle.
    pub fn publish(&self, tree: HomeTree) {
        let tree = Arc::new(tree);
        let now = Utc::now();
        self.snapshot.rcu(|current| Snapshot {
            tree: Some(Arc::clone(&tree)),
            up: true,
            last_success: Some(now),
            failures_total: current.failures_total,
        });
    }

    /// Mark the latest cycle as failed, keeping the previous tree.
    pub fn record_failure(&self) {
        self.snapshot.rcu(|current| Snapshot {
            up: false,
            failures_total: current.failures_total.saturating_add(1),
            ..Snapshot::clone(current)
        });
    }

    /// Full exposition text for the current snapshot.
    pub fn render(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = render_self(&snapshot, &self.prefix);
        if let Some(tree) = &snapshot.tree {
            out.push_str(&render(tree, &self.prefix));
        }
        out
    }
}

// ── Field naming ─────────────────────────────────────────────────────

/// Metric suffix and help text for fields with a well-known meaning.
/// Anything else is exported under its raw field name.
const ROOM_FIELDS: &[(&str, &str, &str)] = &[
    ("air_quality", "air_quality_value", "Air quality value"),
    ("algo_status", "algo_status_value", "Algo status of the room"),
    ("co2", "co2_ppm", "CO2 concentration in ppm"),
    ("humidity", "humidity_percent", "Humidity in percent"),
    ("lux", "lux_lux", "Light brightness in lux"),
    ("temperature", "temperature_celsius", "Temperature in degrees celsius"),
];

const MODULE_FIELDS: &[(&str, &str, &str)] = &[
    ("battery_level", "battery_level_mV", "Battery charge in millivolts"),
    ("battery_percent", "battery_percent", "Battery charge in percent"),
    ("current_position", "current_position_percent", "Current window position in percent open"),
    ("firmware_revision", "firmware_revision", "Firmware revision"),
    ("is_raining", "raining_bool", "Raining state"),
    ("locked", "locked_bool", "Locked state"),
    ("locking", "locking_bool", "Locking in progress"),
    ("mode", "control_mode", "Control mode in use"),
    ("reachable", "reachable_bool", "Whether the device is reachable"),
    ("rf_strength", "rf_strength", "RF signal strength"),
    ("secure_position", "secure_position", "Secure window position"),
    ("silent", "silent_bool", "Silent mode on"),
    ("target_position", "target_position_percent", "Target window position in percent open"),
    ("wifi_strength", "wifi_strength", "WiFi signal strength"),
];

fn describe(table: &[(&str, &'static str, &'static str)], field: &str) -> (String, String) {
    table
        .iter()
        .find(|(name, _, _)| *name == field)
        .map_or_else(
            || (sanitize_name(field), format!("Reported value of `{field}`")),
            |(_, metric, help)| ((*metric).to_owned(), (*help).to_owned()),
        )
}

/// Window actuators report a coarse `battery_state` instead of a percentage.
fn battery_percent_from_state(state: &str) -> f64 {
    match state {
        "full" => 90.0,
        "high" => 80.0,
        _ => 0.0,
    }
}

// ── Rendering ────────────────────────────────────────────────────────

#[derive(Default)]
struct Family {
    help: String,
    kind: &'static str,
    samples: Vec<String>,
}

/// Samples grouped by metric name so HELP/TYPE are written once per family.
#[derive(Default)]
struct Exposition {
    families: BTreeMap<String, Family>,
}

impl Exposition {
    fn push(&mut self, name: String, help: String, labels: &[(&str, &str)], value: f64) {
        let family = self.families.entry(name.clone()).or_insert_with(|| Family {
            help,
            kind: "gauge",
            samples: Vec::new(),
        });
        family
            .samples
            .push(format!("{name}{} {}", format_labels(labels), format_value(value)));
    }

    fn push_value(&mut self, name: String, help: String, labels: &[(&str, &str)], value: &Value) {
        match value {
            Value::Bool(flag) => self.push(name, help, labels, if *flag { 1.0 } else { 0.0 }),
            Value::Number(number) => {
                if let Some(v) = number.as_f64() {
                    self.push(name, help, labels, v);
                }
            }
            Value::String(text) => {
                let mut labels = labels.to_vec();
                labels.push(("value", text.as_str()));
                self.push(format!("{name}_info"), help, &labels, 1.0);
            }
            // Nested objects and arrays have no scalar reading.
            Value::Null | Value::Array(_) | Value::Object(_) => {}
        }
    }

    fn finish(self) -> String {
        let mut out = String::new();
        for (name, family) in self.families {
            let _ = writeln!(out, "# HELP {name} {}", escape_help(&family.help));
            let _ = writeln!(out, "# TYPE {name} {}", family.kind);
            for sample in family.samples {
                out.push_str(&sample);
                out.push('\n');
            }
        }
        out
    }
}

/// Render room and module metrics for a reconciled tree.
pub fn render(tree: &HomeTree, prefix: &str) -> String {
    let mut exposition = Exposition::default();
    for room in tree.rooms.values() {
        render_room(&mut exposition, prefix, room);
        for module in &room.modules {
            render_module(&mut exposition, prefix, room, module);
        }
    }
    exposition.finish()
}

fn render_room(exposition: &mut Exposition, prefix: &str, room: &Room) {
    let labels = [("id", room.id.as_str()), ("name", room.name.as_str())];
    for (field, value) in &room.measurements {
        let (metric, help) = describe(ROOM_FIELDS, field);
        exposition.push_value(format!("{prefix}_room_{metric}"), help, &labels, value);
    }
}

fn render_module(exposition: &mut Exposition, prefix: &str, room: &Room, module: &Module) {
    let labels = [
        ("id", module.id.as_str()),
        ("name", module.name.as_str()),
        ("type", module.module_type.as_str()),
        ("room_id", room.id.as_str()),
        ("room_name", room.name.as_str()),
    ];
    for (field, value) in &module.attributes {
        let (metric, help) = describe(MODULE_FIELDS, field);
        exposition.push_value(format!("{prefix}_module_{metric}"), help, &labels, value);
    }
    if let Some(percent) = derived_battery_percent(&module.attributes) {
        let (metric, help) = describe(MODULE_FIELDS, "battery_percent");
        exposition.push(format!("{prefix}_module_{metric}"), help, &labels, percent);
    }
}

fn derived_battery_percent(attributes: &Map<String, Value>) -> Option<f64> {
    if attributes.contains_key("battery_percent") {
        return None;
    }
    attributes
        .get("battery_state")
        .and_then(Value::as_str)
        .map(battery_percent_from_state)
}

fn render_self(snapshot: &Snapshot, prefix: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# HELP {prefix}_up Whether the last poll cycle succeeded");
    let _ = writeln!(out, "# TYPE {prefix}_up gauge");
    let _ = writeln!(out, "{prefix}_up {}", u8::from(snapshot.up));

    if let Some(at) = snapshot.last_success {
        let _ = writeln!(
            out,
            "# HELP {prefix}_last_success_timestamp_seconds Unix time of the last successful poll cycle"
        );
        let _ = writeln!(out, "# TYPE {prefix}_last_success_timestamp_seconds gauge");
        let _ = writeln!(out, "{prefix}_last_success_timestamp_seconds {}", at.timestamp());
    }

    let _ = writeln!(out, "# HELP {prefix}_cycle_failures_total Failed poll cycles since start");
    let _ = writeln!(out, "# TYPE {prefix}_cycle_failures_total counter");
    let _ = writeln!(out, "{prefix}_cycle_failures_total {}", snapshot.failures_total);
    out
}

// ── Text format helpers ──────────────────────────────────────────────

/// Map an arbitrary field name onto `[a-zA-Z0-9_]`, never starting with a digit.
fn sanitize_name(raw: &str) -> String {
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    name
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn escape_label(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".into()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf".into() } else { "-Inf".into() }
    } else {
        value.to_string()
    }
}
