mod common;

use common::*;
use hearth_lib::game::instance::relocate::{copy_planned, plan_move};
use hearth_lib::game::instance::CreateInstance;
use hearth_lib::{Branch, InstanceRegistry, InstanceState, RegistryError, SettingsStore};
use std::fs;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tempfile::TempDir;

fn pre_release(version: u32) -> CreateInstance {
    CreateInstance {
        branch: Branch::PreRelease,
        version,
        custom_name: Some("Testing".to_string()),
        ..Default::default()
    }
}

#[tokio::test]
async fn identical_requests_create_distinct_instances() {
    let tmp = TempDir::new().unwrap();
    let registry = InstanceRegistry::open(tmp.path().join("Instances")).await.unwrap();

    let a = registry.create(pre_release(3)).await.unwrap();
    let b = registry.create(pre_release(3)).await.unwrap();

    assert_ne!(a.id, b.id);
    assert_eq!(registry.list().await.len(), 2);
    assert_eq!(registry.selected().await.map(|m| m.id), Some(a.id.clone()));
    assert_eq!(registry.state(&b.id).await, InstanceState::Uninitialized);

    // Survives a reopen.
    let reopened = InstanceRegistry::open(tmp.path().join("Instances")).await.unwrap();
    assert_eq!(reopened.get(&b.id).await.map(|m| m.display_name()), Some("Testing".to_string()));
}

#[tokio::test]
async fn deleting_unknown_or_deleted_instances_is_a_no_op() {
    let tmp = TempDir::new().unwrap();
    let registry = InstanceRegistry::open(tmp.path().join("Instances")).await.unwrap();
    let a = registry.create(pre_release(1)).await.unwrap();

    assert!(!registry.delete("missing").await.unwrap());
    assert!(registry.delete(&a.id).await.unwrap());
    assert!(!registry.delete(&a.id).await.unwrap());
    assert_eq!(registry.state(&a.id).await, InstanceState::Deleted);
    assert!(registry.selected().await.is_none());
}

#[tokio::test]
async fn move_root_relocates_and_persists_setting() {
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("Instances");
    let new_root = tmp.path().join("Elsewhere");
    let registry = InstanceRegistry::open(&old_root).await.unwrap();
    let a = registry.create(pre_release(1)).await.unwrap();
    fs::write(old_root.join(&a.id).join("UserData").join("save.dat"), b"progress").unwrap();

    let settings = MemorySettings::default();
    let mut last_percent = 0.0;
    registry
        .move_root(&new_root, &settings, |p| last_percent = p.percent())
        .await
        .unwrap();

    assert_eq!(last_percent, 100.0);
    assert_eq!(settings.instance_directory(), Some(new_root.clone()));
    assert_eq!(registry.root().await, new_root);
    assert!(new_root.join(&a.id).join("UserData").join("save.dat").exists());
    assert!(!old_root.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reads_continue_while_the_root_is_moving() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("Instances");
    let new_root = tmp.path().join("Elsewhere");
    let registry = Arc::new(InstanceRegistry::open(&old_root).await.unwrap());
    let a = registry.create(pre_release(1)).await.unwrap();
    fs::write(old_root.join(&a.id).join("UserData").join("save.dat"), b"progress").unwrap();

    // Park the copy on its first progress report.
    let (started_tx, started_rx) = tokio::sync::oneshot::channel();
    let (resume_tx, resume_rx) = mpsc::channel::<()>();
    let mut started_tx = Some(started_tx);
    let settings = Arc::new(MemorySettings::default());

    let mover = {
        let registry = registry.clone();
        let settings = settings.clone();
        let target = new_root.clone();
        tokio::spawn(async move {
            registry
                .move_root(&target, settings.as_ref(), move |_| {
                    if let Some(tx) = started_tx.take() {
                        let _ = tx.send(());
                        let _ = resume_rx.recv();
                    }
                })
                .await
        })
    };

    started_rx.await.unwrap();
    assert!(registry.is_moving());

    let listed = tokio::time::timeout(Duration::from_secs(1), registry.list())
        .await
        .expect("list should not wait for the copy");
    assert_eq!(listed.len(), 1);
    assert_eq!(registry.root().await, old_root);

    assert!(matches!(
        registry.create(pre_release(2)).await,
        Err(RegistryError::MoveInProgress)
    ));
    assert!(matches!(
        registry.rename(&a.id, Some("Renamed".to_string())).await,
        Err(RegistryError::MoveInProgress)
    ));

    resume_tx.send(()).unwrap();
    mover.await.unwrap().unwrap();

    assert!(!registry.is_moving());
    assert_eq!(registry.root().await, new_root);
    assert!(registry.create(pre_release(2)).await.is_ok());
    assert_eq!(registry.list().await.len(), 2);
}

#[tokio::test]
async fn failed_settings_save_keeps_the_old_root() {
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("Instances");
    let registry = InstanceRegistry::open(&old_root).await.unwrap();
    registry.create(pre_release(1)).await.unwrap();

    let settings = MemorySettings {
        fail_save: true,
        ..Default::default()
    };
    let err = registry
        .move_root(&tmp.path().join("New"), &settings, |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::ConfigPersist(_)));
    assert_eq!(settings.instance_directory(), None);
    assert_eq!(registry.root().await, old_root);
    assert_eq!(registry.list().await.len(), 1);
}

#[tokio::test]
async fn interrupted_move_leaves_the_old_root_authoritative() {
    let tmp = TempDir::new().unwrap();
    let old_root = tmp.path().join("Instances");
    let new_root = tmp.path().join("Copy");
    {
        let registry = InstanceRegistry::open(&old_root).await.unwrap();
        registry.create(pre_release(2)).await.unwrap();

        // Plan and copy only, as if the process died before the setting was saved.
        let plan = plan_move(&old_root).await.unwrap();
        copy_planned(&plan, &new_root, |_| {}).await.unwrap();
    }

    let settings = MemorySettings::default();
    let root = InstanceRegistry::default_root(tmp.path(), &settings);
    assert_eq!(root, old_root);
    let reopened = InstanceRegistry::open(&root).await.unwrap();
    assert_eq!(reopened.list().await.len(), 1);

    // Moving onto the leftover copy is refused rather than merged.
    let err = reopened.move_root(&new_root, &settings, |_| {}).await.unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyExists(_)));
}

#[tokio::test]
async fn moving_into_the_current_root_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("Instances");
    let registry = InstanceRegistry::open(&root).await.unwrap();
    let settings = MemorySettings::default();

    let err = registry
        .move_root(&root.join("nested"), &settings, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidTarget(_)));
}

#[tokio::test]
async fn legacy_pin_becomes_a_single_instance() {
    let tmp = TempDir::new().unwrap();
    let registry = InstanceRegistry::open(tmp.path().join("Instances")).await.unwrap();
    let settings = MemorySettings {
        branch: Branch::PreRelease,
        selected_version: Some(8),
        ..Default::default()
    };

    let migrated = registry.migrate_legacy(&settings).await.unwrap().unwrap();
    assert_eq!(migrated.branch, Branch::PreRelease);
    assert_eq!(migrated.version, 8);
    assert!(registry.migrate_legacy(&settings).await.unwrap().is_none());
}
