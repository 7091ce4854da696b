use docboot::ErrorCode;
use docboot::document::{Filter, doc};
use docboot::driver::memory::MemoryDriver;
use docboot::driver::{Collection, Database};
use docboot::fixtures::{FixtureLoader, LoadOptions, LoaderRegistry, LoaderSpec, load_dirs};
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn write_fixture(dir: &Path, file: &str, body: &str) {
    fs::write(dir.join(file), body).expect("write fixture");
}

#[tokio::test]
async fn loading_replaces_previous_contents() {
    let dir = tempdir().expect("tempdir");
    write_fixture(
        dir.path(),
        "users.json",
        &json!({"data": [{"_id": "a"}, {"_id": "b"}]}).to_string(),
    );
    write_fixture(
        dir.path(),
        "settings.toml",
        "upsert = true\n\n[[data]]\n_id = \"theme\"\nvalue = \"dark\"\n",
    );

    let driver = MemoryDriver::new();
    let db = driver.open("memory://local/app").expect("open");
    db.collection("users")
        .insert_many(vec![doc(json!({"_id": "stale1"})), doc(json!({"_id": "stale2"}))])
        .await
        .expect("stale");

    let loader = FixtureLoader::open(&driver, LoaderSpec::connection(db.clone()))
        .await
        .expect("loader");
    let first = loader
        .load_fixtures(dir.path(), LoadOptions::default())
        .await
        .expect("first load");
    let second = loader
        .load_fixtures(dir.path(), LoadOptions::default())
        .await
        .expect("second load");
    assert_eq!(first, second);

    let users = db.collection("users").find(&Filter::All).await.expect("users");
    let ids: Vec<_> = users.iter().filter_map(|u| u.get("_id")).collect();
    assert_eq!(ids, vec![&json!("a"), &json!("b")]);
    let settings = second.collection("settings").expect("settings");
    assert_eq!(settings.upserted, 1);
    assert_eq!(settings.inserted, 0);
}

#[tokio::test]
async fn no_clear_loader_appends_and_reports_duplicates() {
    let dir = tempdir().expect("tempdir");
    write_fixture(
        dir.path(),
        "events.json",
        &json!({"name": "events", "data": [{"_id": 1}, {"_id": 2}]}).to_string(),
    );

    let driver = MemoryDriver::new();
    let db = driver.open("memory://local/app").expect("open");
    db.collection("events")
        .insert_one(doc(json!({"_id": 1})))
        .await
        .expect("existing");

    let loader = FixtureLoader::open(&driver, LoaderSpec::connection(db.clone()).with_clear(false))
        .await
        .expect("loader");
    let report = loader
        .load_fixtures(dir.path(), LoadOptions::default())
        .await
        .expect("load");
    let events = report.collection("events").expect("events");
    assert!(!events.cleared);
    assert_eq!(events.inserted, 1);
    assert_eq!(events.errors.len(), 1);

    // Per-call clear overrides the loader default.
    let report = loader
        .load_fixtures(dir.path(), LoadOptions { clear: true })
        .await
        .expect("load with clear");
    assert!(report.collection("events").expect("events").cleared);
    assert!(!report.has_errors());
}

#[tokio::test]
async fn missing_directory_is_an_io_error() {
    let driver = MemoryDriver::new();
    let loader = FixtureLoader::open(&driver, LoaderSpec::uri("memory://local/app"))
        .await
        .expect("loader");
    let err = loader
        .load_fixtures(Path::new("/definitely/not/here"), LoadOptions::default())
        .await
        .expect_err("missing dir");
    assert_eq!(err.code(), ErrorCode::Io);
}

#[tokio::test]
async fn registry_tracks_loaders_across_directories() {
    let base = tempdir().expect("tempdir");
    let main_dir = base.path().join("main");
    let extra_dir = base.path().join("extra");
    fs::create_dir_all(&main_dir).expect("mkdir");
    fs::create_dir_all(&extra_dir).expect("mkdir");
    write_fixture(&main_dir, "users.json", &json!({"data": [{"_id": 1}]}).to_string());
    write_fixture(&extra_dir, "roles.json", &json!({"data": [{"_id": "r"}]}).to_string());

    let driver = MemoryDriver::new();
    let registry = LoaderRegistry::new(Arc::new(driver.clone()));
    let written = registry
        .scope(|loaders| async move {
            let loader = loaders
                .load(LoaderSpec::uri("memory://local/app"))
                .await
                .expect("loader");
            let report = load_dirs(&loader, &[main_dir.as_path(), extra_dir.as_path()], LoadOptions::default())
                .await
                .expect("load");
            assert_eq!(report.collections.len(), 2);
            report.written()
        })
        .await;
    assert_eq!(written, 2);
    assert!(registry.is_empty());

    let check = driver.open("memory://local/app").expect("reopen");
    assert_eq!(check.collection_names(), vec!["roles".to_string(), "users".to_string()]);
    assert_eq!(check.collection("roles").count(&Filter::All).await.expect("count"), 1);
}
