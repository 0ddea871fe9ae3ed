use bson::{Bson, Document, doc};
use chrono::DateTime;

use prepdoc_core::{
    driver::{BulkOp, CommandDriverBuilder, WriteSummary},
    error::QueryError,
    options::{LookupMode, StatementOptions},
    statement::{PreparedStatement, StatementState},
};
use prepdoc_memory::{DriverCommand, InMemoryDriver};

async fn seeded() -> InMemoryDriver {
    InMemoryDriver::builder()
        .collection(
            "users",
            [
                doc! { "_id": 1, "UM_USER_NAME": "Alice", "name": "alice", "role": "admin", "age": 30, "tmp": true },
                doc! { "_id": 2, "UM_USER_NAME": "bob", "name": "bob", "role": "dev", "age": 25 },
                doc! { "_id": 3, "UM_USER_NAME": "carol", "name": "carol", "role": "dev", "age": 41 },
            ],
        )
        .collection(
            "roles",
            [
                doc! { "_id": 10, "name": "admin", "level": 9 },
                doc! { "_id": 11, "name": "dev", "level": 3 },
            ],
        )
        .build()
        .await
        .unwrap()
}

fn names(documents: &[Document]) -> Vec<&str> {
    documents
        .iter()
        .map(|document| document.get_str("name").unwrap())
        .collect()
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn state_tracks_bindings_and_execution() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#).unwrap();

    assert_eq!(statement.state(), StatementState::PartiallyBound);

    statement.bind_string("name", "alice").unwrap();
    assert_eq!(statement.state(), StatementState::Bound);

    statement.find().await.unwrap();
    assert_eq!(statement.state(), StatementState::Used);
}

#[tokio::test]
async fn count_mismatch_never_reaches_the_driver() {
    let driver = seeded().await;
    let mut statement =
        PreparedStatement::new(&driver, r#"{"collection":"users","name":"?","role":"?"}"#).unwrap();
    statement.bind_string("name", "alice").unwrap();

    let mismatch = QueryError::ParameterCountMismatch { placeholders: 2, bindings: 1 };

    assert_eq!(statement.find().await, Err(mismatch.clone()));
    assert_eq!(statement.insert().await, Err(mismatch.clone()));
    assert_eq!(statement.remove().await, Err(mismatch.clone()));
    assert_eq!(statement.distinct().await, Err(mismatch.clone()));
    assert_eq!(statement.add_batch(), Err(mismatch));
    assert_eq!(statement.state(), StatementState::PartiallyBound);

    let mut update = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","_id":"?","projection":{"$set":{"role":"?"}}}"#,
    )
    .unwrap();
    update.bind_int("_id", 1).unwrap();

    let mismatch = QueryError::ParameterCountMismatch { placeholders: 2, bindings: 1 };

    assert_eq!(update.update().await, Err(mismatch.clone()));
    assert_eq!(update.update_batch(), Err(mismatch));
    assert_eq!(update.pending_batch(), 0);

    let mut aggregate = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","$match":{"role":"?","age":"?"}}"#,
    )
    .unwrap();
    aggregate.bind_string("role", "dev").unwrap();

    assert_eq!(
        aggregate.aggregate().await,
        Err(QueryError::ParameterCountMismatch { placeholders: 2, bindings: 1 })
    );
    assert!(driver.journal().await.is_empty());
}

#[tokio::test]
async fn closed_statement_rejects_everything() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#).unwrap();
    statement.bind_string("name", "alice").unwrap();

    statement.close();
    statement.close();

    assert!(statement.is_closed());
    assert_eq!(statement.state(), StatementState::Closed);
    assert!(matches!(statement.bind_int("age", 1), Err(QueryError::Closed)));
    assert_eq!(statement.find().await, Err(QueryError::Closed));
    assert_eq!(statement.update().await, Err(QueryError::Closed));
    assert_eq!(statement.aggregate().await, Err(QueryError::Closed));
    assert_eq!(statement.insert_bulk().await, Err(QueryError::Closed));
    assert_eq!(statement.set_multi_lookup(true), Err(QueryError::Closed));
    assert!(driver.journal().await.is_empty());
}

#[tokio::test]
async fn statement_is_reusable_with_new_bindings() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","role":"?"}"#).unwrap();

    statement.bind_string("role", "admin").unwrap();
    assert_eq!(names(&statement.find().await.unwrap()), vec!["alice"]);

    statement.bind_string("role", "dev").unwrap();
    assert_eq!(names(&statement.find().await.unwrap()), vec!["bob", "carol"]);
}

// =========================================================================
// Commands
// =========================================================================

#[tokio::test]
async fn find_sends_the_bound_filter() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#).unwrap();
    statement.bind_string("name", "alice").unwrap();

    let found = statement.find().await.unwrap();

    assert_eq!(names(&found), vec!["alice"]);
    assert_eq!(
        driver.journal().await,
        vec![DriverCommand::Find {
            collection: "users".to_string(),
            filter: doc! { "name": "alice" },
            projection: None,
        }]
    );
}

#[tokio::test]
async fn find_applies_the_projection() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","role":"?","projection":{"name":1,"_id":0}}"#,
    )
    .unwrap();
    statement.bind_string("role", "dev").unwrap();

    let found = statement.find().await.unwrap();

    assert_eq!(found, vec![doc! { "name": "bob" }, doc! { "name": "carol" }]);
}

#[tokio::test]
async fn case_insensitive_regex_find() {
    let driver = seeded().await;
    let mut statement =
        PreparedStatement::new(&driver, r#"{"collection":"users","UM_USER_NAME":{"$regex":"?"}}"#).unwrap();
    statement.bind_string("$regex", "^al").unwrap();

    let found = statement.find().await.unwrap();

    assert_eq!(names(&found), vec!["alice"]);
}

#[tokio::test]
async fn insert_writes_the_filter_document() {
    let driver = InMemoryDriver::new();
    let mut statement =
        PreparedStatement::new(&driver, r#"{"collection":"users","name":"?","joined":"?"}"#).unwrap();
    let joined = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    statement
        .bind_string("name", "dave")
        .unwrap()
        .bind_date("joined", joined)
        .unwrap();

    let summary = statement.insert().await.unwrap();
    let stored = driver.documents("users").await;

    assert_eq!(summary, WriteSummary { inserted: 1, ..Default::default() });
    assert_eq!(stored.len(), 1);
    assert!(matches!(stored[0].get("_id"), Some(Bson::ObjectId(_))));
    assert_eq!(stored[0].get_str("name").unwrap(), "dave");
    assert_eq!(
        stored[0].get_datetime("joined").unwrap(),
        &bson::DateTime::from_millis(1_700_000_000_000)
    );
}

#[tokio::test]
async fn update_sets_fields_on_the_first_match() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","_id":"?","projection":{"$set":{"role":"?"}}}"#,
    )
    .unwrap();
    statement
        .bind_int("_id", 2)
        .unwrap()
        .bind_string("role", "admin")
        .unwrap();

    let summary = statement.update().await.unwrap();

    assert_eq!(summary, WriteSummary { matched: 1, modified: 1, ..Default::default() });
    assert_eq!(
        driver.journal().await,
        vec![DriverCommand::Update {
            collection: "users".to_string(),
            filter: doc! { "_id": 2 },
            update: doc! { "$set": { "role": "admin" } },
        }]
    );
    assert_eq!(driver.documents("users").await[1].get_str("role").unwrap(), "admin");
}

#[tokio::test]
async fn unset_then_set_on_one_driver() {
    let driver = seeded().await;

    let mut unset = PreparedStatement::new(
        &driver,
        r#"{"collection":"users","_id":"?","projection":{"$unset":{"tmp":1}}}"#,
    )
    .unwrap();
    unset.bind_int("_id", 1).unwrap();
    unset.update().await.unwrap();

    let mut set = PreparedStatement::new(&driver, r#"{"collection":"users","_id":"?","$set":{"tmp":"?"}}"#).unwrap();
    set.bind_int("_id", 1).unwrap().bind_bool("tmp", false).unwrap();
    set.update().await.unwrap();

    let journal = driver.journal().await;
    assert!(matches!(&journal[0], DriverCommand::Update { update, .. } if update == &doc! { "$unset": { "tmp": 1 } }));
    assert!(matches!(&journal[1], DriverCommand::Update { update, .. } if update == &doc! { "$set": { "tmp": false } }));
    assert!(!driver.documents("users").await[0].get_bool("tmp").unwrap());
}

#[tokio::test]
async fn remove_deletes_every_match() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","role":"?"}"#).unwrap();
    statement.bind_string("role", "dev").unwrap();

    let summary = statement.remove().await.unwrap();

    assert_eq!(summary.deleted, 2);
    assert_eq!(names(&driver.documents("users").await), vec!["alice"]);
}

#[tokio::test]
async fn distinct_returns_unique_values() {
    let driver = seeded().await;
    let mut statement =
        PreparedStatement::new(&driver, r#"{"collection":"users","distinct":"role","role":"?"}"#).unwrap();
    statement.bind_string("role", "*").unwrap();

    let values = statement.distinct().await.unwrap();

    assert_eq!(values, vec![Bson::from("admin"), Bson::from("dev")]);
}

#[tokio::test]
async fn distinct_requires_a_key() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","role":"?"}"#).unwrap();
    statement.bind_string("role", "dev").unwrap();

    assert_eq!(statement.distinct().await, Err(QueryError::MissingDistinctKey));
}

#[tokio::test]
async fn aggregate_joins_and_filters() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(
        &driver,
        r#"{
            "collection": "users",
            "$lookup": {"from": "roles", "localField": "role", "foreignField": "name", "as": "grant"},
            "$unwind": "$grant",
            "$match": {"role": "?"},
            "$sort": {"age": -1},
            "$project": {"name": 1, "grant.level": 1, "_id": 0}
        }"#,
    )
    .unwrap();
    statement.bind_string("role", "dev").unwrap();

    let rows = statement.aggregate().await.unwrap();

    assert_eq!(
        rows,
        vec![
            doc! { "name": "carol", "grant": { "level": 3 } },
            doc! { "name": "bob", "grant": { "level": 3 } },
        ]
    );
}

#[tokio::test]
async fn multi_lookup_flag_changes_the_pipeline_layout() {
    let driver = seeded().await;
    let template = r#"{
        "collection": "users",
        "$lookup": {"from": "roles", "localField": "role", "foreignField": "name", "as": "a"},
        "$lookupB": {"from": "roles", "localField": "a.name", "foreignField": "name", "as": "b", "dependency": true},
        "$unwind": "$a",
        "$unwindB": "$b"
    }"#;

    let mut statement = PreparedStatement::new(&driver, template).unwrap();
    assert_eq!(statement.lookup_mode(), Ok(LookupMode::Single));

    statement.set_multi_lookup(false).unwrap();
    assert_eq!(statement.lookup_mode(), Ok(LookupMode::Interleaved));
    statement.aggregate().await.unwrap();

    let journal = driver.journal().await;
    let DriverCommand::Aggregate { pipeline, .. } = &journal[0] else {
        panic!("expected an aggregate command");
    };
    let layout = pipeline
        .iter()
        .map(|stage| match stage.get_document("$lookup") {
            Ok(lookup) => format!("lookup:{}", lookup.get_str("as").unwrap()),
            Err(_) => format!("unwind:{}", stage.get_str("$unwind").unwrap()),
        })
        .collect::<Vec<_>>();

    assert_eq!(layout, vec!["lookup:a", "unwind:$a", "unwind:$b", "lookup:b"]);
}

// =========================================================================
// Bulk
// =========================================================================

#[tokio::test]
async fn add_batch_accumulates_and_insert_bulk_drains() {
    let driver = InMemoryDriver::new();
    let mut statement = PreparedStatement::new(&driver, r#"{"collection":"users","name":"?"}"#).unwrap();

    for name in ["erin", "frank"] {
        statement.bind_string("name", name).unwrap();
        statement.add_batch().unwrap();
    }

    assert_eq!(statement.pending_batch(), 2);
    assert_eq!(statement.state(), StatementState::Batching);
    assert!(driver.journal().await.is_empty());

    let summary = statement.insert_bulk().await.unwrap();

    assert_eq!(summary.inserted, 2);
    assert_eq!(statement.pending_batch(), 0);
    assert_eq!(statement.state(), StatementState::Used);
    assert_eq!(names(&driver.documents("users").await), vec!["erin", "frank"]);
    assert_eq!(
        driver.journal().await,
        vec![DriverCommand::BulkWrite {
            collection: "users".to_string(),
            operations: vec![
                BulkOp::Insert(doc! { "name": "erin" }),
                BulkOp::Insert(doc! { "name": "frank" }),
            ],
        }]
    );

    assert_eq!(statement.insert_bulk().await, Err(QueryError::EmptyBatch));
}

#[tokio::test]
async fn update_batch_replaces_or_upserts() {
    let driver = seeded().await;
    let mut statement = PreparedStatement::new(
        &driver,
        r#"{"collection":"roles","name":"?","$set":{"level":"?"}}"#,
    )
    .unwrap();

    statement.bind_string("name", "dev").unwrap().bind_int("level", 5).unwrap();
    statement.update_batch().unwrap();
    statement.bind_string("name", "ops").unwrap().bind_int("level", 7).unwrap();
    statement.update_batch().unwrap();

    let summary = statement.update_bulk().await.unwrap();

    assert_eq!(summary.matched, 1);
    assert_eq!(summary.modified, 1);
    assert_eq!(summary.upserted, 1);

    let roles = driver.documents("roles").await;
    assert_eq!(roles[1], doc! { "_id": 11, "level": 5 });
    assert_eq!(roles[2].get_i32("level").unwrap(), 7);
}

#[tokio::test]
async fn lenient_statement_drops_unbound_placeholders() {
    let driver = seeded().await;
    let options = StatementOptions::builder().lenient().build();
    let mut statement = PreparedStatement::with_options(
        &driver,
        r#"{"collection":"users","$match":{"role":"?","name":"?"}}"#,
        options,
    )
    .unwrap();

    // Two placeholders, two bindings: one of them under a name the template never uses.
    statement.bind_string("role", "dev").unwrap().bind_int("unused", 1).unwrap();

    let rows = statement.aggregate().await.unwrap();

    assert_eq!(names(&rows), vec!["bob", "carol"]);
}
