//! Integration tests for the complete almsync pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - YAML config → RunSettings → loader
//! - typedef → columns → DDL → warehouse tables
//! - records → projection → snapshot reload / versioned reconcile
//!
//! Run with: cargo test --test integration_tests

use almsync_etl::{run, Action, Config, RunContext, RunReport, RunSettings};
use almsync_schema::{AttributeDef, EntityTypeDef, TableMode};
use almsync_store::MemoryWarehouse;
use almsync_wsapi::FixtureSource;
use serde_json::{json, Value};
use tempfile::tempdir;

// ============================================================================
// Fixtures
// ============================================================================

fn defect_typedef() -> EntityTypeDef {
    EntityTypeDef::new(
        "Defect",
        vec![
            AttributeDef::new("CreationDate", "DATE"),
            AttributeDef::new("ObjectID", "INTEGER"),
            AttributeDef::new("FormattedID", "STRING"),
            AttributeDef::new("Name", "STRING"),
            AttributeDef::new("State", "RATING")
                .with_allowed_values(["Submitted", "Open", "Fixed", "Closed"]),
            AttributeDef::new("PlanEstimate", "QUANTITY"),
            AttributeDef::new("ScheduleState", "STATE").with_allowed_values([
                "Defined",
                "In-Progress",
                "Completed",
                "Accepted",
            ]),
            AttributeDef::new("Owner", "OBJECT").with_schema_type("User"),
            AttributeDef::new("Tasks", "COLLECTION").with_schema_type("Task"),
        ],
    )
}

fn defect(id: i64, state: &str, schedule: &str, estimate: Value) -> Value {
    json!({
        "ObjectID": id,
        "CreationDate": "2024-03-01T10:15:00.000Z",
        "FormattedID": format!("DE{id}"),
        "Name": format!("Crash #{id}"),
        "State": state,
        "PlanEstimate": estimate,
        "ScheduleState": schedule,
        "Owner": {"_ref": "https://alm/slm/webservice/v2.0/user/7.js", "_refObjectName": "Bo"},
        "Tasks": {"Count": 2}
    })
}

fn defect_source() -> FixtureSource {
    FixtureSource::new()
        .with_typedef("Defect", defect_typedef())
        .with_records(
            "Defect",
            vec![
                defect(10, "Open", "In-Progress", json!(2)),
                defect(11, "Fixed", "Completed", json!(1.5)),
            ],
        )
}

const CONFIG: &str = r#"
ac:
  url: https://alm.example.com/slm/webservice/v2.0
  apikey: _secret
  workspace: /workspace/1
  fetch: CreationDate,ObjectID,State,PlanEstimate,ScheduleState,Owner
  pagesize: 200
db:
  name: alm
  user: loader
  tables: Defect
  history: true
"#;

fn load(
    source: &FixtureSource,
    store: &mut MemoryWarehouse,
    settings: &RunSettings,
    action: Action,
) -> RunReport {
    let mut ctx = RunContext::new(settings.clone(), source);
    run(&mut ctx, store, action)
}

// ============================================================================
// Snapshot tables
// ============================================================================

#[test]
fn test_defect_snapshot_create() {
    let source = defect_source();
    let mut store = MemoryWarehouse::new();
    let settings = RunSettings::new(
        &["Defect"],
        "CreationDate,ObjectID,State,PlanEstimate,ScheduleState",
    );

    let report = load(&source, &mut store, &settings, Action::Create);
    assert!(report.is_success(), "{:?}", report.failures);
    assert_eq!(report.entity("Defect").unwrap().loaded, 2);

    let table = store.table("defect").expect("defect table");
    assert_eq!(
        table.columns(),
        ["creationdate", "objectid", "state", "planestimate", "schedulestate"]
    );

    let state = table.definition("state").unwrap();
    assert!(state.contains("CHECK"));
    assert!(state.contains("'Fixed'"));
    let schedule = table.definition("schedulestate").unwrap();
    assert!(schedule.contains("CHECK"));
    assert!(schedule.contains("'In-Progress'"));

    let fixed = &table.rows()[1];
    assert_eq!(fixed.get("objectid"), Some("11"));
    assert_eq!(fixed.get("state"), Some("Fixed"));
    assert_eq!(fixed.get("planestimate"), Some("1.5"));
}

#[test]
fn test_snapshot_update_requires_existing_table() {
    let source = defect_source();
    let mut store = MemoryWarehouse::new();
    let settings = RunSettings::new(&["Defect"], "State");

    let report = load(&source, &mut store, &settings, Action::Update);
    assert!(!report.is_success());
    assert!(store.table("defect").is_none());
}

#[test]
fn test_create_twice_fails_without_touching_rows() {
    let source = defect_source();
    let mut store = MemoryWarehouse::new();
    let settings = RunSettings::new(&["Defect"], "State");

    assert!(load(&source, &mut store, &settings, Action::Create).is_success());
    let report = load(&source, &mut store, &settings, Action::Create);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(store.table("defect").unwrap().rows().len(), 2);
}

// ============================================================================
// Versioned tables
// ============================================================================

#[test]
fn test_versioned_update_is_idempotent_and_tracks_changes() {
    let mut source = defect_source();
    let mut store = MemoryWarehouse::new();
    let settings = RunSettings::new(&["Defect"], "State,PlanEstimate,ScheduleState,Owner")
        .with_mode(TableMode::Versioned);

    let first = load(&source, &mut store, &settings, Action::Create);
    assert_eq!(first.entity("Defect").unwrap().reconcile.unwrap().inserted, 2);

    for _ in 0..2 {
        let again = load(&source, &mut store, &settings, Action::Update);
        let counters = again.entity("Defect").unwrap().reconcile.unwrap();
        assert_eq!(counters.unchanged, 2);
        assert_eq!(counters.rows_written(), 0);
    }
    assert_eq!(store.table("defect").unwrap().rows().len(), 2);

    source.set_records(
        "Defect",
        vec![
            defect(10, "Fixed", "Completed", json!(2)),
            defect(11, "Fixed", "Completed", json!(1.5)),
            defect(12, "Submitted", "Defined", json!(null)),
        ],
    );
    let changed = load(&source, &mut store, &settings, Action::Update);
    let counters = changed.entity("Defect").unwrap().reconcile.unwrap();
    assert_eq!(counters.revised, 1);
    assert_eq!(counters.inserted, 1);
    assert_eq!(counters.unchanged, 1);

    let table = store.table("defect").unwrap();
    assert_eq!(table.open_rows().count(), 3);

    let history = table.history("objectid", 10);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].get("state"), Some("Open"));
    assert_eq!(history[0].get("_valid_to"), history[1].get("_valid_from"));
    assert_eq!(history[1].get("state"), Some("Fixed"));
    assert_eq!(history[1].get("_valid_to"), None);
    assert_eq!(history[1].get("owner"), Some("7"));

    let new_row = &table.history("objectid", 12)[0];
    assert_eq!(new_row.get("planestimate"), None);
}

// ============================================================================
// Config → run
// ============================================================================

#[test]
fn test_config_file_drives_the_run() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("almsync.yml");
    std::fs::write(&path, CONFIG).unwrap();

    let config = Config::load(&path).expect("config");
    assert_eq!(config.table_mode(), TableMode::Versioned);
    assert_eq!(config.pg_params().port, 5432);

    let settings = RunSettings::from_config(&config);
    assert_eq!(settings.entities, ["Defect"]);
    assert_eq!(settings.page_size, 200);

    let source = defect_source();
    let mut store = MemoryWarehouse::new();
    let report = load(&source, &mut store, &settings, Action::Create);
    assert!(report.is_success(), "{:?}", report.failures);

    let requests = source.requests();
    assert_eq!(requests[0].1.page_size, 200);
    assert_eq!(
        requests[0].1.fetch,
        ["CreationDate", "ObjectID", "State", "PlanEstimate", "ScheduleState", "Owner"]
    );

    let table = store.table("defect").unwrap();
    assert!(table.columns().contains(&"_valid_from"));
    assert!(table.has_index("defect_open_rows"));
}

#[test]
fn test_config_rejects_unknown_keys() {
    let bad = CONFIG.replace("history: true", "history: true\n  histroy: false");
    assert!(Config::from_yaml(&bad).is_err());
}
