use dvrmanager::settings::{ExportItem, ExportItemPatch, Settings, SettingsError, SettingsStore};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_missing_file_creates_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("settings.json");

    let store = SettingsStore::open(&path);

    assert!(path.exists(), "defaults should be written to disk");
    assert_eq!(store.snapshot(), Settings::create_default());
    assert_eq!(Settings::read(&path).unwrap(), Settings::create_default());
}

#[test]
fn test_existing_file_is_loaded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{
            "target_directory": "/srv/dvr",
            "export_items": [
                { "drive_name": "CAR_CAM", "drive_path": "VIDEO/*.mp4", "delete": false, "unmount": true }
            ]
        }"#,
    )
    .unwrap();

    let store = SettingsStore::open(&path);
    let settings = store.snapshot();

    assert_eq!(settings.target_directory, PathBuf::from("/srv/dvr"));
    assert_eq!(settings.export_items.len(), 1);

    let rule = &settings.export_items[0];
    assert_eq!(rule.drive_name, "CAR_CAM");
    assert_eq!(rule.pattern(), Some("VIDEO/*.mp4"));
    assert!(!rule.delete);
    assert!(rule.unmount);
    assert!(rule.automatic, "missing flag defaults to automatic");
}

#[test]
fn test_invalid_file_is_moved_aside() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(&path, "{ not json").unwrap();

    let store = SettingsStore::open(&path);

    assert_eq!(store.snapshot(), Settings::create_default());
    assert!(!path.exists());

    let backup = dir.path().join("settings.json.bak");
    assert_eq!(fs::read_to_string(backup).unwrap(), "{ not json");
}

#[test]
fn test_mutations_are_persisted() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::open(&path);

    let index = store.add_default_rule().unwrap();
    assert_eq!(index, 1);

    store
        .update_rule(
            index,
            ExportItemPatch {
                drive_name: Some("SECOND".into()),
                drive_path: Some(String::new()),
                automatic: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    store.set_target_directory(dir.path().join("archive")).unwrap();

    let removed = store.remove_rule(0).unwrap();
    assert_eq!(removed, ExportItem::create_default());

    let on_disk = Settings::read(&path).unwrap();
    assert_eq!(on_disk, store.snapshot());
    assert_eq!(on_disk.target_directory, dir.path().join("archive"));
    assert_eq!(on_disk.export_items.len(), 1);
    assert_eq!(on_disk.export_items[0].drive_name, "SECOND");
    assert_eq!(on_disk.export_items[0].pattern(), None);
    assert!(!on_disk.export_items[0].automatic);

    // A second store sees the same thing
    assert_eq!(SettingsStore::open(&path).snapshot(), on_disk);
}

#[test]
fn test_bad_index_is_an_error() {
    let dir = tempdir().unwrap();
    let store = SettingsStore::open(dir.path().join("settings.json"));

    assert!(matches!(store.rule(5), Err(SettingsError::NoSuchRule(5))));
    assert!(matches!(store.remove_rule(1), Err(SettingsError::NoSuchRule(1))));
    assert!(matches!(
        store.update_rule(3, ExportItemPatch::default()),
        Err(SettingsError::NoSuchRule(3))
    ));
}

#[test]
fn test_reload_picks_up_external_edits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::open(&path);
    assert!(!store.reload_if_changed(), "nothing changed yet");

    let mut edited = store.snapshot();
    edited.export_items[0].drive_name = "EDITED".into();
    edited.save(&path).unwrap();
    bump_mtime(&path);

    assert!(store.reload_if_changed());
    assert_eq!(store.rule(0).unwrap().drive_name, "EDITED");
    assert!(!store.reload_if_changed());
}

#[test]
fn test_reload_ignores_broken_edits() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let store = SettingsStore::open(&path);
    let before = store.snapshot();

    fs::write(&path, "[").unwrap();
    bump_mtime(&path);

    assert!(!store.reload_if_changed());
    assert_eq!(store.snapshot(), before);
}

#[test]
fn test_mutation_keeps_edits_from_another_process() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    let daemon = SettingsStore::open(&path);
    let cli = SettingsStore::open(&path);

    cli.update_rule(
        0,
        ExportItemPatch {
            drive_name: Some("CAR_CAM".into()),
            ..ExportItemPatch::default()
        },
    )
    .unwrap();
    bump_mtime(&path);

    // The daemon never polled, its copy still has the old name
    assert_eq!(daemon.add_default_rule().unwrap(), 1);

    let on_disk = Settings::read(&path).unwrap();
    assert_eq!(on_disk.export_items.len(), 2);
    assert_eq!(on_disk.export_items[0].drive_name, "CAR_CAM");
    assert_eq!(daemon.snapshot(), on_disk);
}

/// Push the mtime forward so coarse filesystem clocks still register a change.
fn bump_mtime(path: &std::path::Path) {
    let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(later)).unwrap();
}
