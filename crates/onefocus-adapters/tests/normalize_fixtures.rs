use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use onefocus_adapters::{load_list_fixture, normalize_at};
use onefocus_core::Bucket;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/clickup")
        .join(name)
}

#[test]
fn mixed_shape_fixture_normalizes_to_canonical_tasks() {
    let fx = load_list_fixture(fixture("list-mixed-shapes.json")).expect("fixture");
    let raw_tasks = fx.raw_tasks();
    assert_eq!(raw_tasks.len(), 5);

    let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let snap = normalize_at(&fx.list, &raw_tasks, Some(Bucket::PrimaryWork), at);

    assert_eq!(snap.project.external_id, "901200345");
    assert_eq!(snap.project.name, "Launch checklist");
    assert_eq!(snap.tasks.len(), 4, "the id-less record is dropped");

    let draft = &snap.tasks[0];
    assert_eq!(draft.status, "in progress");
    assert_eq!(draft.tags, vec!["marketing", "copy"]);
    assert_eq!(draft.nominal_estimate_min, Some(90));
    assert_eq!(draft.due_at, Utc.timestamp_millis_opt(1_767_225_600_000).single());

    let venue = &snap.tasks[1];
    assert_eq!(venue.status, "complete");
    assert_eq!(venue.tags, vec!["ops"]);
    assert_eq!(venue.nominal_estimate_min, None);

    let quotes = &snap.tasks[2];
    assert_eq!(quotes.status, "unknown");
    assert!(quotes.due_at.is_none());

    let invites = &snap.tasks[3];
    assert_eq!(invites.external_id, "86b0aa5");
    assert_eq!(invites.nominal_estimate_min, None);

    assert_eq!(snap.raw["list"], fx.list.raw);
    assert_eq!(snap.raw["list"]["folder"]["name"], "Q3");
    assert_eq!(snap.raw["tasks"].as_array().map(Vec::len), Some(5));
}

#[test]
fn empty_list_fixture_yields_project_without_tasks() {
    let fx = load_list_fixture(fixture("list-empty.json")).expect("fixture");
    let snap = normalize_at(&fx.list, &fx.raw_tasks(), None, Utc::now());

    assert!(snap.tasks.is_empty());
    assert_eq!(snap.project.bucket, Bucket::EverythingElse);
}

#[test]
fn missing_fixture_reports_the_path() {
    let err = load_list_fixture(fixture("does-not-exist.json")).unwrap_err();
    assert!(format!("{err:#}").contains("does-not-exist.json"));
}
