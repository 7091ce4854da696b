use docboot::connection::ConnectionRegistry;
use docboot::document::{Filter, doc};
use docboot::driver::memory::MemoryDriver;
use docboot::driver::{Collection, Database};
use docboot::seed::{
    ForceFlag, SeedOutcome, SeedSpec, Seeder, SeedingToolset, encrypt_password, seed_all,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn user_spec() -> SeedSpec {
    SeedSpec::new("MAIN")
        .collection(
            "users",
            vec![
                doc(json!({"_id": "admin", "password": "js:{encryptPassword('secret')}"})),
                doc(json!({"_id": "guest", "password": "js:{encryptPassword('guest')}"})),
            ],
        )
        .collection("audit", Vec::new())
}

#[tokio::test]
async fn empty_collection_is_seeded_with_processed_documents() {
    let driver = MemoryDriver::new();
    let db = driver.open("memory://local/app").expect("open");
    let seeder = Seeder::new(
        db.clone(),
        user_spec(),
        ForceFlag::default(),
        Arc::new(SeedingToolset::default()),
    );

    let check = seeder.seed_needed("users").await.expect("check");
    assert!(check.needed);
    assert_eq!(check.current_count, 0);

    let report = seeder.seed().await;
    assert_eq!(
        report.outcome("users"),
        Some(&SeedOutcome::Seeded {
            inserted: 2,
            cleared: false
        })
    );
    assert_eq!(
        report.outcome("audit"),
        Some(&SeedOutcome::Seeded {
            inserted: 0,
            cleared: false
        })
    );

    let admin = db
        .collection("users")
        .find_one(&Filter::by_id(json!("admin")))
        .await
        .expect("find")
        .expect("admin seeded");
    assert_eq!(admin.get("password"), Some(&json!(encrypt_password("secret"))));
}

#[tokio::test]
async fn populated_collection_is_left_alone_unless_forced() {
    let driver = MemoryDriver::new();
    let db = driver.open("memory://local/app").expect("open");
    db.collection("users")
        .insert_one(doc(json!({"_id": "existing"})))
        .await
        .expect("insert");

    let toolset = Arc::new(SeedingToolset::default());
    let report = Seeder::new(db.clone(), user_spec(), ForceFlag::default(), toolset.clone())
        .seed()
        .await;
    assert_eq!(
        report.outcome("users"),
        Some(&SeedOutcome::Skipped { current_count: 1 })
    );

    let force: ForceFlag =
        serde_json::from_value(json!({"MAIN": {"users": true}})).expect("force flag");
    let report = Seeder::new(db.clone(), user_spec(), force, toolset).seed().await;
    assert_eq!(
        report.outcome("users"),
        Some(&SeedOutcome::Seeded {
            inserted: 2,
            cleared: true
        })
    );
    let users = db.collection("users");
    assert_eq!(users.count(&Filter::All).await.expect("count"), 2);
    assert!(
        users
            .find_one(&Filter::by_id(json!("existing")))
            .await
            .expect("find")
            .is_none()
    );
}

#[tokio::test]
async fn a_failing_collection_does_not_stop_its_siblings() {
    let driver = MemoryDriver::new();
    let db = driver.open("memory://local/app").expect("open");
    db.collection("roles")
        .insert_one(doc(json!({"_id": "kept"})))
        .await
        .expect("insert");

    let spec = SeedSpec::new("MAIN")
        .collection("roles", vec![doc(json!({"_id": "admin", "token": "js:{shell('rm')}"}))])
        .collection("dupes", vec![doc(json!({"_id": 1})), doc(json!({"_id": 1}))])
        .collection("users", vec![doc(json!({"_id": "u1"}))]);
    let report = Seeder::new(
        db.clone(),
        spec,
        ForceFlag::Global(true),
        Arc::new(SeedingToolset::default()),
    )
    .seed()
    .await;

    assert_eq!(report.failed().count(), 2);
    assert!(matches!(report.outcome("roles"), Some(SeedOutcome::Failed(_))));
    assert!(matches!(report.outcome("dupes"), Some(SeedOutcome::Failed(_))));
    assert_eq!(
        report.outcome("users"),
        Some(&SeedOutcome::Seeded {
            inserted: 1,
            cleared: false
        })
    );
    // The unknown function was caught before the clear.
    assert_eq!(
        db.collection("roles").count(&Filter::All).await.expect("count"),
        1
    );
}

#[tokio::test]
async fn seed_all_covers_every_database_and_reports_missing_ones() {
    let driver = MemoryDriver::new();
    let main = driver.open("memory://local/app").expect("open main");
    let raw = driver.open("memory://local/raw").expect("open raw");
    let mut registry = ConnectionRegistry::default();
    registry.insert("MAIN", main.clone());
    registry.insert("RAW", raw.clone());

    let specs = vec![
        SeedSpec::new("MAIN").collection("users", vec![doc(json!({"_id": 1}))]),
        SeedSpec::new("RAW").collection("products", vec![doc(json!({"_id": "p1"}))]),
        SeedSpec::new("GONE").collection("things", vec![doc(json!({"_id": 1}))]),
    ];
    let reports = seed_all(
        &registry,
        &specs,
        &ForceFlag::default(),
        Arc::new(SeedingToolset::default()),
    )
    .await;

    let by_db: BTreeMap<_, _> = reports.iter().map(|r| (r.database.as_str(), r)).collect();
    assert_eq!(by_db.len(), 3);
    assert!(matches!(
        by_db["GONE"].outcome("things"),
        Some(SeedOutcome::Failed(_))
    ));
    assert_eq!(main.collection("users").count(&Filter::All).await.expect("count"), 1);
    assert_eq!(raw.collection("products").count(&Filter::All).await.expect("count"), 1);

    // Second run finds data everywhere and changes nothing.
    let again = seed_all(
        &registry,
        &specs[..2],
        &ForceFlag::default(),
        Arc::new(SeedingToolset::default()),
    )
    .await;
    assert!(again.iter().flat_map(|r| &r.collections).all(|c| matches!(
        c.outcome,
        SeedOutcome::Skipped { current_count: 1 }
    )));
}
