use super::*;
use crate::desired::{build_desired, DesiredInputs};
use crate::manifest::{ManifestRecord, StoredManifest};
use crate::model::{DepartmentRule, Device};
use crate::store::memory::MemoryStore;
use crate::testing::{device, rule, stored_manifest, FakeInventory};

const PREFIX: &str = "manifests/";

fn store_with(objects: &[(&str, Vec<u8>)]) -> MemoryStore {
    let store = MemoryStore::default();
    for (name, bytes) in objects {
        store.insert(&format!("{PREFIX}{name}"), bytes.clone());
    }
    store
}

fn known_from(store: &MemoryStore) -> KnownManifests {
    KnownManifests::from_object_names(PREFIX, &store.list_names(PREFIX).expect("list"))
}

fn run_with_known(
    store: &MemoryStore,
    known: &KnownManifests,
    inventory: &FakeInventory,
    devices: &[Device],
    rules: &[DepartmentRule],
    mode: ApplyMode,
    delete_orphans: bool,
) -> ReconcileReport {
    let catalogs = vec!["Production".to_string()];
    let protected_names: Vec<String> = rules.iter().map(|rule| rule.manifest.clone()).collect();
    let ctx = ReconcileContext {
        prefix: PREFIX,
        known,
        protected_names: &protected_names,
        mode,
        delete_orphans,
    };
    let orphans = reconcile_orphans(store, ctx, devices);
    let desired = build_desired(
        inventory,
        devices,
        DesiredInputs {
            rules,
            known,
            catalogs: &catalogs,
        },
    );
    reconcile_devices(store, ctx, &desired, orphans)
}

fn run(
    store: &MemoryStore,
    inventory: &FakeInventory,
    devices: &[Device],
    rules: &[DepartmentRule],
    mode: ApplyMode,
    delete_orphans: bool,
) -> ReconcileReport {
    let known = known_from(store);
    run_with_known(store, &known, inventory, devices, rules, mode, delete_orphans)
}

fn included(store: &MemoryStore, serial: &str) -> Vec<String> {
    let bytes = store
        .object(&format!("{PREFIX}{serial}"))
        .expect("manifest present");
    StoredManifest::decode(&bytes)
        .expect("decode")
        .included_manifests()
        .to_vec()
}

fn placeholder() -> Vec<u8> {
    b"<plist/>".to_vec()
}

#[test]
fn creates_manifest_with_department_for_new_device() {
    let store = store_with(&[("deptA", placeholder()), ("site_default", placeholder())]);
    let inventory = FakeInventory::default().with_device("aad-s1", &["g1"]);
    let report = run(
        &store,
        &inventory,
        &[device("S1", Some("aad-s1"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert_eq!(
        report.devices[0].action,
        DeviceAction::Created {
            included_manifests: vec!["site_default".to_string(), "deptA".to_string()],
        }
    );
    assert_eq!(included(&store, "S1"), vec!["site_default", "deptA"]);
    let record: ManifestRecord =
        plist::from_bytes(&store.object("manifests/S1").expect("present")).expect("decode");
    assert_eq!(record.serial_number, "S1");
    assert_eq!(record.user, "s1@example.com");
}

#[test]
fn removes_department_when_device_left_group() {
    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", stored_manifest("S2", &["site_default", "deptA"])),
    ]);
    let inventory = FakeInventory::default().with_device("aad-s2", &[]);
    let report = run(
        &store,
        &inventory,
        &[device("S2", Some("aad-s2"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert_eq!(
        report.devices[0].action,
        DeviceAction::Updated {
            added: Vec::new(),
            removed: vec!["deptA".to_string()],
            included_manifests: vec!["site_default".to_string()],
        }
    );
    assert_eq!(included(&store, "S2"), vec!["site_default"]);
}

#[test]
fn keeps_manifest_named_by_current_group() {
    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", stored_manifest("S2", &["site_default", "deptA"])),
    ]);
    let inventory = FakeInventory::default().with_named_groups("aad-s2", &[("g9", "deptA")]);
    let report = run(
        &store,
        &inventory,
        &[device("S2", Some("aad-s2"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert_eq!(report.devices[0].action, DeviceAction::Unchanged);
    assert_eq!(store.writes(), 0);
}

#[test]
fn device_without_directory_identity_gets_site_default_manifest() {
    let store = store_with(&[("deptA", placeholder())]);
    let inventory = FakeInventory::default();
    let report = run(
        &store,
        &inventory,
        &[device("S3", None)],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Created { .. }));
    assert_eq!(included(&store, "S3"), vec!["site_default"]);
    assert_eq!(inventory.lookups(), 0);
}

#[test]
fn ghost_manifest_is_candidate_until_deletion_enabled() {
    let store = store_with(&[("ghost", placeholder())]);
    let inventory = FakeInventory::default();
    let devices = [device("S3", None)];

    let report = run(&store, &inventory, &devices, &[], ApplyMode::Apply, false);
    assert_eq!(
        report.orphans,
        vec![OrphanOutcome {
            name: "ghost".to_string(),
            action: OrphanAction::Candidate,
        }]
    );
    assert!(store.object("manifests/ghost").is_some());

    let report = run(&store, &inventory, &devices, &[], ApplyMode::Apply, true);
    assert_eq!(report.orphans[0].action, OrphanAction::Deleted);
    assert_eq!(report.summary.deleted, 1);
    assert!(store.object("manifests/ghost").is_none());
}

#[test]
fn dry_run_never_deletes_orphans() {
    let store = store_with(&[("ghost", placeholder())]);
    let inventory = FakeInventory::default();
    let report = run(
        &store,
        &inventory,
        &[device("S3", None)],
        &[],
        ApplyMode::DryRun,
        true,
    );
    assert_eq!(report.orphans[0].action, OrphanAction::Candidate);
    assert_eq!(store.deletes(), 0);
}

#[test]
fn orphan_detection_spares_devices_departments_and_site_default() {
    let known = KnownManifests::new(["S1", "deptA", "site_default", "ghost", "old-dept"]);
    let serials: BTreeSet<&str> = ["S1"].into_iter().collect();
    let orphans = find_orphans(&known, &serials, &["deptA".to_string()]);
    assert_eq!(orphans, vec!["ghost", "old-dept"]);
}

#[test]
fn empty_inventory_refuses_orphan_deletion() {
    let store = store_with(&[("S1", stored_manifest("S1", &["site_default"]))]);
    let inventory = FakeInventory::default();
    let report = run(&store, &inventory, &[], &[], ApplyMode::Apply, true);
    assert_eq!(report.orphans[0].action, OrphanAction::Refused);
    assert!(store.object("manifests/S1").is_some());
}

#[test]
fn second_run_without_changes_writes_nothing() {
    let store = store_with(&[("deptA", placeholder()), ("deptB", placeholder())]);
    let inventory = FakeInventory::default()
        .with_device("aad-s1", &["g1", "g2"])
        .with_device("aad-s2", &[]);
    let devices = [
        device("S1", Some("aad-s1")),
        device("S2", Some("aad-s2")),
        device("S3", None),
    ];
    let rules = [rule("g1", "deptA"), rule("g2", "deptB")];

    let first = run(&store, &inventory, &devices, &rules, ApplyMode::Apply, false);
    assert_eq!(first.summary.created, 3);
    let writes = store.writes();

    let second = run(&store, &inventory, &devices, &rules, ApplyMode::Apply, false);
    assert_eq!(second.summary.unchanged, 3);
    assert_eq!(store.writes(), writes);
}

#[test]
fn dry_run_reports_actions_without_writing() {
    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", stored_manifest("S2", &["site_default", "deptA"])),
    ]);
    let inventory = FakeInventory::default()
        .with_device("aad-s1", &["g1"])
        .with_device("aad-s2", &[]);
    let report = run(
        &store,
        &inventory,
        &[device("S1", Some("aad-s1")), device("S2", Some("aad-s2"))],
        &[rule("g1", "deptA")],
        ApplyMode::DryRun,
        false,
    );
    assert_eq!(report.mode, ApplyMode::DryRun);
    assert_eq!(report.summary.created, 1);
    assert_eq!(report.summary.updated, 1);
    assert_eq!(store.writes(), 0);
    assert!(store.object("manifests/S1").is_none());
    assert_eq!(included(&store, "S2"), vec!["site_default", "deptA"]);
}

#[test]
fn storage_failure_is_isolated_to_one_device() {
    let store = store_with(&[("S5", stored_manifest("S5", &["deptA"]))]);
    store.fail_on("manifests/S5");
    let inventory = FakeInventory::default();
    let report = run(
        &store,
        &inventory,
        &[device("S5", None), device("S6", None)],
        &[],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Failed { .. }));
    assert!(matches!(report.devices[1].action, DeviceAction::Created { .. }));
    assert_eq!(report.summary.failed, 1);
}

#[test]
fn membership_failure_skips_update_but_not_create() {
    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", stored_manifest("S2", &["site_default", "deptA"])),
    ]);
    let inventory = FakeInventory::default()
        .with_failing("aad-s2")
        .with_failing("aad-s4");
    let report = run(
        &store,
        &inventory,
        &[device("S2", Some("aad-s2")), device("S4", Some("aad-s4"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Skipped { .. }));
    assert_eq!(included(&store, "S2"), vec!["site_default", "deptA"]);
    assert_eq!(included(&store, "S4"), vec!["site_default"]);
}

#[test]
fn failed_membership_listing_keeps_departments_on_update() {
    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", stored_manifest("S2", &["site_default", "deptA"])),
    ]);
    let inventory = FakeInventory::default()
        .with_device("aad-s2", &["g1"])
        .with_failing_memberships("aad-s2");
    let report = run(
        &store,
        &inventory,
        &[device("S2", Some("aad-s2"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert_eq!(inventory.lookups(), 1);
    assert_eq!(inventory.membership_lookups(), 1);
    match &report.devices[0].action {
        DeviceAction::Skipped { reason } => {
            assert!(reason.starts_with("group membership lookup failed"), "{reason}")
        }
        other => panic!("expected skip, got {other:?}"),
    }
    assert_eq!(store.writes(), 0);
    assert_eq!(included(&store, "S2"), vec!["site_default", "deptA"]);
}

#[test]
fn update_preserves_keys_it_does_not_manage() {
    let strings = |names: &[&str]| {
        plist::Value::Array(
            names
                .iter()
                .map(|name| plist::Value::String(name.to_string()))
                .collect(),
        )
    };
    let mut root = plist::Dictionary::new();
    root.insert("catalogs".to_string(), strings(&["Production"]));
    root.insert("included_manifests".to_string(), strings(&["site_default", "deptA"]));
    root.insert("managed_uninstalls".to_string(), strings(&["OldTool"]));
    root.insert("serialnumber".to_string(), plist::Value::String("S2".to_string()));
    let mut bytes = Vec::new();
    plist::Value::Dictionary(root)
        .to_writer_xml(&mut bytes)
        .expect("write");

    let store = store_with(&[
        ("deptA", placeholder()),
        ("S2", bytes),
    ]);
    let inventory = FakeInventory::default().with_device("aad-s2", &[]);
    let report = run(
        &store,
        &inventory,
        &[device("S2", Some("aad-s2"))],
        &[rule("g1", "deptA")],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Updated { .. }));
    let rewritten = String::from_utf8(store.object("manifests/S2").expect("present")).expect("utf8");
    assert!(rewritten.contains("<key>managed_uninstalls</key>"));
    assert!(rewritten.contains("OldTool"));
    assert_eq!(included(&store, "S2"), vec!["site_default"]);
}

#[test]
fn listed_manifest_missing_on_fetch_is_skipped() {
    let store = MemoryStore::default();
    let known = KnownManifests::new(["S7"]);
    let inventory = FakeInventory::default();
    let report = run_with_known(
        &store,
        &known,
        &inventory,
        &[device("S7", None)],
        &[],
        ApplyMode::Apply,
        false,
    );
    assert_eq!(
        report.devices[0].action,
        DeviceAction::Skipped {
            reason: "manifest not found".to_string(),
        }
    );
}

#[test]
fn stale_reference_to_missing_department_is_removed_and_site_default_restored() {
    let store = store_with(&[("S8", stored_manifest("S8", &["deptGone"]))]);
    let inventory = FakeInventory::default().with_device("aad-s8", &["g1"]);
    let report = run(
        &store,
        &inventory,
        &[device("S8", Some("aad-s8"))],
        &[rule("g1", "deptGone")],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Updated { .. }));
    assert_eq!(included(&store, "S8"), vec!["site_default"]);
}

#[test]
fn blank_and_duplicate_serials_are_skipped() {
    let store = MemoryStore::default();
    let inventory = FakeInventory::default();
    let report = run(
        &store,
        &inventory,
        &[device(" ", None), device("S1", None), device("S1", None)],
        &[],
        ApplyMode::Apply,
        false,
    );
    assert!(matches!(report.devices[0].action, DeviceAction::Skipped { .. }));
    assert!(matches!(report.devices[1].action, DeviceAction::Created { .. }));
    assert!(matches!(report.devices[2].action, DeviceAction::Skipped { .. }));
    assert_eq!(store.writes(), 1);
}

#[test]
fn report_serializes_with_action_tags() {
    let outcome = DeviceOutcome {
        serial: "S1".to_string(),
        display_name: "Mac S1".to_string(),
        action: DeviceAction::Unchanged,
    };
    let value = serde_json::to_value(&outcome).expect("serialize");
    assert_eq!(value["action"], "unchanged");
    assert_eq!(value["serial"], "S1");
}
