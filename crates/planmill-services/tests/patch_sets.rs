//! Patch-set apply and rollback against a real filesystem

use planmill_config::PatchesConfig;
use planmill_foundation::model::{ApplyOptions, CreateOptions, FilePatch, Impact};
use planmill_foundation::PlanError;
use planmill_services::services::PatchSetManager;
use planmill_test_support::{MockPatchCheck, TestProject};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn manager(project: &TestProject) -> PatchSetManager {
    PatchSetManager::new(project.path(), &PatchesConfig::default())
}

fn validated() -> CreateOptions {
    CreateOptions {
        validate: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn apply_then_rollback_restores_originals() {
    let project = TestProject::new();
    project
        .write("src/a.rs", "fn alpha() {}\nfn beta() {}\n")
        .write("src/b.rs", "use crate::alpha;\n\n\tindented();\r\n");
    let manager = manager(&project);

    let patches = vec![
        FilePatch::from_contents(
            "src/a.rs",
            project.read("src/a.rs"),
            "fn gamma() {}\nfn beta() {}\n",
            "test",
            "rename alpha",
        ),
        FilePatch::from_contents(
            "src/b.rs",
            project.read("src/b.rs"),
            "use crate::gamma;\n\n\tindented();\r\n",
            "test",
            "update import",
        ),
        FilePatch::from_contents("src/new.rs", "", "pub mod fresh;\n", "test", "new file"),
    ];
    let set = manager
        .create("rename", "alpha to gamma", patches, &validated())
        .await
        .unwrap();

    let applied = manager.apply(&set.id, ApplyOptions::default()).await.unwrap();
    assert!(applied.success);
    assert_eq!(project.read("src/a.rs"), "fn gamma() {}\nfn beta() {}\n");
    assert_eq!(project.read("src/new.rs"), "pub mod fresh;\n");

    let rolled_back = manager.rollback(&set.id).await.unwrap();
    assert!(rolled_back.success, "{:?}", rolled_back.failed_patches);
    assert_eq!(project.read("src/a.rs"), "fn alpha() {}\nfn beta() {}\n");
    assert_eq!(project.read("src/b.rs"), "use crate::alpha;\n\n\tindented();\r\n");
    assert!(!project.absolute("src/new.rs").exists());
}

#[tokio::test]
async fn stacked_patches_on_one_file_unwind_in_reverse() {
    let project = TestProject::new();
    project.write("lib.rs", "one\n");
    let manager = manager(&project);

    let patches = vec![
        FilePatch::from_contents("lib.rs", "one\n", "two\n", "test", "first"),
        FilePatch::from_contents("lib.rs", "two\n", "three\n", "test", "second"),
    ];
    let set = manager
        .create("stacked", "", patches, &CreateOptions::default())
        .await
        .unwrap();
    assert_eq!(set.metadata.files_affected, 1);

    manager.apply(&set.id, ApplyOptions::default()).await.unwrap();
    assert_eq!(project.read("lib.rs"), "three\n");

    manager.rollback(&set.id).await.unwrap();
    assert_eq!(project.read("lib.rs"), "one\n");
}

#[tokio::test]
async fn failed_write_does_not_stop_remaining_files() {
    let project = TestProject::new();
    project.write("a.rs", "a");
    // A directory where a file is expected makes the write fail
    std::fs::create_dir_all(project.absolute("b.rs")).unwrap();
    let manager = manager(&project);

    let patches = vec![
        FilePatch::from_contents("a.rs", "a", "A", "test", "upper"),
        FilePatch::from_contents("b.rs", "b", "B", "test", "upper"),
    ];
    let set = manager
        .create("partial", "", patches, &CreateOptions::default())
        .await
        .unwrap();

    let report = manager
        .apply(
            &set.id,
            ApplyOptions {
                dry_run: false,
                backup: true,
            },
        )
        .await
        .unwrap();

    assert!(!report.success);
    assert_eq!(report.applied_patches, vec!["a.rs".to_string()]);
    assert_eq!(report.failed_paths(), vec!["b.rs"]);
    assert_eq!(project.read("a.rs"), "A");
    assert_eq!(report.rollback_data[0].content, "a");
}

#[tokio::test]
async fn custom_check_rejects_patch_set() {
    let project = TestProject::new();
    let mut check = MockPatchCheck::new();
    check.expect_check().times(2).returning(|_, patch| {
        if patch.file_path == "b.rs" {
            Err("b.rs is locked by another tool".to_string())
        } else {
            Ok(())
        }
    });
    let manager = manager(&project).with_check(Arc::new(check));

    let patches = vec![
        FilePatch::from_contents("a.rs", "", "a", "test", "create"),
        FilePatch::from_contents("b.rs", "", "b", "test", "create"),
    ];
    let error = manager
        .create("checked", "", patches, &validated())
        .await
        .unwrap_err();

    match error {
        PlanError::InvalidData { message } => assert!(message.contains("locked by another tool")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(manager.list().is_empty());
}

#[tokio::test]
async fn checksum_check_accepts_untouched_files() {
    let project = TestProject::new();
    project.write("a.rs", "same");
    let manager = manager(&project);

    let set = manager
        .create(
            "fresh",
            "",
            vec![FilePatch::from_contents("a.rs", "same", "different", "test", "d")],
            &validated(),
        )
        .await
        .unwrap();
    assert_eq!(set.metadata.estimated_impact, Impact::Low);
}

#[tokio::test]
async fn concurrent_applies_on_one_id_both_complete() {
    let project = TestProject::new();
    project.write("a.rs", "old");
    let manager = Arc::new(manager(&project));
    let set = manager
        .create(
            "shared",
            "",
            vec![FilePatch::from_contents("a.rs", "old", "new", "test", "d")],
            &CreateOptions::default(),
        )
        .await
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = manager.clone();
            let id = set.id.clone();
            tokio::spawn(async move { manager.apply(&id, ApplyOptions::default()).await })
        })
        .collect();

    for handle in handles {
        assert!(handle.await.unwrap().unwrap().success);
    }
    assert_eq!(project.read("a.rs"), "new");
}

#[tokio::test]
async fn exported_json_uses_camel_case_keys() {
    let project = TestProject::new();
    let manager = manager(&project);
    let set = manager
        .create(
            "export",
            "",
            vec![FilePatch::from_contents("a.rs", "x", "y", "test", "d")],
            &CreateOptions::default(),
        )
        .await
        .unwrap();

    let exported = manager.export_json(&set.id).unwrap();
    let value: serde_json::Value = serde_json::from_str(&exported).unwrap();
    assert_eq!(value["metadata"]["estimatedImpact"], "low");
    assert!(value["rollbackPlan"]["patches"].is_array());
    assert!(matches!(
        manager.export_json("missing"),
        Err(PlanError::PatchSetNotFound { .. })
    ));
}
