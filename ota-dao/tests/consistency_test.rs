mod common;

use common::{hello_app, joe, joe_with_key, TestDao};
use ota_core::error::AppError;
use ota_dao::models::{AccessKey, Collaborator, NewApp, Package, UserUpdate};
use ota_dao::services::{WritePlan, WriteStep};
use ota_dao::store::{RowKey, StoreClient, Table};
use ota_dao::DaoError;
use std::collections::BTreeSet;

// ==================== Divergence ====================

#[tokio::test]
async fn access_key_pointing_at_missing_user_is_divergence() {
    let app = TestDao::spawn();
    let user = app
        .dao
        .create_user(joe_with_key("joe@b.com", "abc123", "key"))
        .await
        .unwrap();
    app.store
        .delete(Table::Users, &RowKey::partition(&user.id))
        .await
        .unwrap();

    let err = app.dao.user_by_access_key("abc123").await.unwrap_err();

    assert!(matches!(err, DaoError::ConsistencyDivergence(_)));
    assert!(err.is_not_found());
    assert!(matches!(AppError::from(err), AppError::NotFound(_)));
}

#[tokio::test]
async fn access_key_no_longer_held_by_user_is_divergence() {
    let app = TestDao::spawn();
    let user = app
        .dao
        .create_user(joe_with_key("joe@b.com", "abc123", "key"))
        .await
        .unwrap();

    // Simulate a crash between the user row write and the key release.
    let mut row = app
        .store
        .get(Table::Users, &RowKey::partition(&user.id))
        .await
        .unwrap()
        .unwrap();
    row.insert("access_keys".into(), serde_json::json!({}));
    app.store
        .put(Table::Users, &RowKey::partition(&user.id), row)
        .await
        .unwrap();

    let err = app.dao.user_by_access_key("abc123").await.unwrap_err();
    assert!(matches!(err, DaoError::ConsistencyDivergence(_)));
}

#[tokio::test]
async fn dangling_collaborator_entry_is_skipped() {
    let app = TestDao::spawn();
    let created = app.dao.create_app(hello_app("test@t.com", "123")).await.unwrap();
    let kept = app.dao.create_app(hello_app("test@t.com", "456")).await.unwrap();
    app.store
        .delete(Table::Apps, &RowKey::partition(&created.id))
        .await
        .unwrap();

    let apps = app.dao.apps_for_collaborator("test@t.com").await.unwrap();

    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id, kept.id);
}

#[tokio::test]
async fn app_still_being_created_is_skipped_until_its_row_lands() {
    let app = TestDao::spawn();
    let created = app.dao.create_app(hello_app("test@t.com", "123")).await.unwrap();
    let key = RowKey::partition(&created.id);
    let row = app.store.get(Table::Apps, &key).await.unwrap().unwrap();

    // Collaborator entry written, app row not yet.
    app.store.delete(Table::Apps, &key).await.unwrap();
    assert!(app.dao.apps_for_collaborator("test@t.com").await.unwrap().is_empty());

    app.store.put(Table::Apps, &key, row).await.unwrap();
    let apps = app.dao.apps_for_collaborator("test@t.com").await.unwrap();
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].id, created.id);
}

#[tokio::test]
async fn deployment_key_for_missing_app_is_divergence() {
    let app = TestDao::spawn();
    let created = app.dao.create_app(hello_app("test@t.com", "123")).await.unwrap();
    app.store
        .delete(Table::Apps, &RowKey::partition(&created.id))
        .await
        .unwrap();

    let err = app.dao.app_for_deployment_key("123").await.unwrap_err();
    assert!(matches!(err, DaoError::ConsistencyDivergence(_)));
    assert!(app.dao.deployment_for_key("123").await.unwrap_err().is_not_found());
}

// ==================== Compensation ====================

#[tokio::test]
async fn failed_user_write_releases_reservations() {
    let app = TestDao::spawn();
    app.store.fail_writes_to(Table::Users);

    let err = app
        .dao
        .create_user(joe_with_key("joe@b.com", "abc123", "key"))
        .await
        .unwrap_err();

    assert!(matches!(err, DaoError::Store(_)));
    assert_eq!(app.store.row_count(Table::UsersByEmail), 0);
    assert_eq!(app.store.row_count(Table::UsersByAccessKey), 0);

    app.store.clear_failures();
    let user = app
        .dao
        .create_user(joe_with_key("joe@b.com", "abc123", "key"))
        .await
        .unwrap();
    assert_eq!(app.dao.user_by_access_key("abc123").await.unwrap().id, user.id);
}

#[tokio::test]
async fn failed_app_write_releases_keys_and_collaborators() {
    let app = TestDao::spawn();
    app.store.fail_writes_to(Table::Apps);

    let err = app
        .dao
        .create_app(
            NewApp::new("Hello")
                .with_collaborator("test@t.com", Collaborator::owner())
                .with_deployment("staging", "123")
                .with_deployment("production", "456"),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DaoError::Store(_)));
    for table in [
        Table::Deployments,
        Table::DeploymentsByKey,
        Table::AppsByCollaborator,
    ] {
        assert_eq!(app.store.row_count(table), 0, "{} kept rows", table);
    }
}

#[tokio::test]
async fn failed_user_update_keeps_previous_keys() {
    let app = TestDao::spawn();
    let user = app
        .dao
        .create_user(joe_with_key("joe@b.com", "old-token", "key"))
        .await
        .unwrap();
    app.store.fail_writes_to(Table::Users);

    let mut update = UserUpdate::from(user.clone());
    update.access_keys.clear();
    update.access_keys.insert("new-token".to_string(), AccessKey::named("key"));
    assert!(app.dao.update_user(&user.email, update).await.is_err());

    app.store.clear_failures();
    assert_eq!(app.dao.user_by_access_key("old-token").await.unwrap().id, user.id);
    assert!(app.dao.user_by_access_key("new-token").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn release_failure_after_removal_leaves_only_dangling_index() {
    let app = TestDao::spawn();
    let created = app.dao.create_app(hello_app("test@t.com", "123")).await.unwrap();
    app.store.fail_writes_to(Table::AppsByCollaborator);

    assert!(app.dao.remove_app(&created.id).await.is_err());
    app.store.clear_failures();

    assert!(app.dao.app_by_id(&created.id).await.unwrap_err().is_not_found());
    assert_eq!(app.store.row_count(Table::AppsByCollaborator), 1);
    assert!(app.dao.apps_for_collaborator("test@t.com").await.unwrap().is_empty());
}

// ==================== Races ====================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creations_of_one_email_admit_one_user() {
    let app = TestDao::spawn();

    let attempts = (0..8).map(|_| app.dao.create_user(joe("race@b.com")));
    let results = futures::future::join_all(attempts).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(DaoError::is_duplicate));
    assert_eq!(app.store.row_count(Table::Users), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_apps_cannot_share_a_deployment_key() {
    let app = TestDao::spawn();
    let first = app.dao.clone();
    let second = app.dao.clone();

    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.create_app(hello_app("a@t.com", "123")).await }),
        tokio::spawn(async move { second.create_app(hello_app("b@t.com", "123")).await }),
    );
    let results = [a.unwrap(), b.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(app.store.row_count(Table::Apps), 1);
    assert_eq!(app.store.row_count(Table::DeploymentsByKey), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_deployment_adds_never_lose_an_accepted_deployment() {
    let app = TestDao::spawn();
    let created = app.dao.create_app(hello_app("test@t.com", "staging-key")).await.unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let dao = app.dao.clone();
            let app_id = created.id.clone();
            tokio::spawn(async move {
                let name = format!("deployment-{}", i);
                let result = dao.add_deployment(&app_id, &name, &format!("key-{}", i)).await;
                (i, result)
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted: BTreeSet<String> = results
        .iter()
        .filter(|(_, result)| result.is_ok())
        .map(|(i, _)| format!("deployment-{}", i))
        .collect();
    assert!(!accepted.is_empty());
    for (i, result) in &results {
        match result {
            Ok(_) => {
                let deployment = app.dao.deployment_for_key(&format!("key-{}", i)).await.unwrap();
                assert_eq!(deployment.name, format!("deployment-{}", i));
            }
            Err(err) => {
                assert!(err.is_conflict(), "unexpected error: {}", err);
                let lookup = app.dao.deployment_for_key(&format!("key-{}", i)).await;
                assert!(matches!(lookup, Err(DaoError::NotFound(_))));
            }
        }
    }

    let names: BTreeSet<String> = app
        .dao
        .app_by_id(&created.id)
        .await
        .unwrap()
        .deployment_names()
        .iter()
        .filter(|name| *name != "staging")
        .cloned()
        .collect();
    assert_eq!(names, accepted);
    assert_eq!(app.store.row_count(Table::Deployments), accepted.len() + 1);
    assert_eq!(app.store.row_count(Table::DeploymentsByKey), accepted.len() + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_package_adds_keep_every_accepted_package() {
    let app = TestDao::spawn();
    app.dao.create_app(hello_app("test@t.com", "123")).await.unwrap();

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let dao = app.dao.clone();
            tokio::spawn(async move {
                dao.add_package("123", Package::new(format!("hash-{}", i)))
                    .await
            })
        })
        .collect();
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let accepted: BTreeSet<String> = results
        .iter()
        .filter_map(|result| result.as_ref().ok())
        .map(|package| package.package_hash.clone())
        .collect();
    assert!(!accepted.is_empty());
    assert!(results
        .iter()
        .filter_map(|result| result.as_ref().err())
        .all(DaoError::is_conflict));

    let created = app.dao.app_for_deployment_key("123").await.unwrap();
    let history = app.dao.history(&created.id, "staging").await.unwrap();
    let stored: BTreeSet<String> = history.into_iter().map(|p| p.package_hash).collect();
    assert_eq!(stored, accepted);
}

#[tokio::test]
async fn update_from_a_stale_read_is_rejected() {
    let app = TestDao::spawn();
    let user = app
        .dao
        .create_user(joe_with_key("joe@b.com", "abc123", "key"))
        .await
        .unwrap();

    let key = RowKey::partition(&user.id);
    let read = app.store.get(Table::Users, &key).await.unwrap().unwrap();

    // Another writer lands between the read and the write.
    let mut newer = read.clone();
    newer.insert("name".into(), serde_json::json!("Joseph"));
    newer.insert("version".into(), serde_json::json!(1));
    app.store.put(Table::Users, &key, newer).await.unwrap();

    let mut ours = read.clone();
    ours.insert("name".into(), serde_json::json!("Joey"));
    let err = WritePlan::new("update_user")
        .then(WriteStep::replace(Table::Users, key, ours, read))
        .execute(app.store.as_ref())
        .await
        .unwrap_err();

    assert!(err.is_conflict());
    assert!(matches!(AppError::from(err), AppError::Conflict(_)));
    assert_eq!(app.dao.user_by_id(&user.id).await.unwrap().name, "Joseph");
}
