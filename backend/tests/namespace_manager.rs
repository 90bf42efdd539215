//! `PostgresNamespaceManager` against embedded PostgreSQL.

use bookshelf::outbound::persistence::PostgresNamespaceManager;
use rstest::rstest;

mod support;

use support::{TestDatabase, unique_namespace};

#[rstest]
fn create_and_drop_are_idempotent() {
    let Some(db) = TestDatabase::provision() else {
        return;
    };
    let manager = PostgresNamespaceManager::new(db.target());
    let namespace = unique_namespace("ns");

    db.block_on(async {
        assert!(!manager.exists(&namespace).await.expect("exists"));

        manager.create_if_not_exists(&namespace).await.expect("create");
        manager
            .create_if_not_exists(&namespace)
            .await
            .expect("create again");
        assert!(manager.exists(&namespace).await.expect("exists"));

        manager.drop_if_exists(&namespace).await.expect("drop");
        manager.drop_if_exists(&namespace).await.expect("drop again");
        assert!(!manager.exists(&namespace).await.expect("exists"));
    });
}

#[rstest]
fn dropping_removes_contained_tables() {
    let Some(db) = TestDatabase::provision() else {
        return;
    };
    let manager = PostgresNamespaceManager::new(db.target());
    let namespace = unique_namespace("ns");

    db.block_on(db.migrator(&namespace).up())
        .expect("migrate");
    assert!(db.table_exists(&namespace, "books"));

    db.block_on(manager.drop_if_exists(&namespace))
        .expect("drop");

    assert!(!db.table_exists(&namespace, "books"));
}
