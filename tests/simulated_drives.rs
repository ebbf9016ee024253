use dvrmanager::adapters::SimulatedFs;
use dvrmanager::core::{DriveError, DriveEvent, DriveFs, DriveMonitor};
use dvrmanager::settings::ExportItem;
use std::fs;
use tempfile::tempdir;

fn rule(name: &str) -> ExportItem {
    ExportItem {
        drive_name: name.to_string(),
        ..ExportItem::create_default()
    }
}

#[test]
fn test_attach_and_detach() {
    let drive = tempdir().unwrap();
    let (drives, sim) = SimulatedFs::new();

    assert!(!drives.drive_exists("CAM"));

    sim.attach("CAM", drive.path());
    assert!(drives.drive_exists("CAM"));
    assert_eq!(drives.drive_path("CAM"), drive.path());
    assert_eq!(sim.attached(), vec!["CAM".to_string()]);

    sim.detach("CAM");
    assert!(!drives.drive_exists("CAM"));
    assert!(sim.attached().is_empty());
}

#[test]
fn test_drive_backed_by_missing_dir_is_not_attached() {
    let drive = tempdir().unwrap();
    let root = drive.path().join("gone");
    let (drives, sim) = SimulatedFs::new();

    sim.attach("CAM", &root);
    assert!(!drives.drive_exists("CAM"));
}

#[test]
fn test_find_matches_uses_rule_pattern() {
    let drive = tempdir().unwrap();
    fs::create_dir_all(drive.path().join("DCIM")).unwrap();
    fs::write(drive.path().join("DCIM/0001.avi"), b"one").unwrap();
    fs::write(drive.path().join("DCIM/0002.AVI"), b"two").unwrap();
    fs::write(drive.path().join("DCIM/index.db"), b"db").unwrap();
    fs::write(drive.path().join("readme.txt"), b"r").unwrap();

    let (drives, sim) = SimulatedFs::new();
    sim.attach("CAM", drive.path());

    let avi = drives.find_matches("CAM", Some("DCIM/*.avi")).unwrap();
    assert_eq!(avi.len(), 2);
    assert!(avi.iter().all(|p| p.starts_with(drive.path())));

    let all = drives.find_matches("CAM", None).unwrap();
    assert_eq!(all.len(), 4);
}

#[test]
fn test_find_matches_on_missing_drive() {
    let (drives, _sim) = SimulatedFs::new();
    let err = drives.find_matches("NOPE", None).unwrap_err();
    assert!(matches!(err, DriveError::NotAttached(name) if name == "NOPE"));
}

#[test]
fn test_unmount_detaches() {
    let drive = tempdir().unwrap();
    let (drives, sim) = SimulatedFs::new();
    sim.attach("CAM", drive.path());

    drives.unmount("CAM").unwrap();
    assert!(!drives.drive_exists("CAM"));
    assert!(drives.unmount("CAM").is_err());

    // The files themselves stay where they were
    assert!(drive.path().exists());
}

#[test]
fn test_monitor_follows_simulator() {
    let drive = tempdir().unwrap();
    let (drives, sim) = SimulatedFs::new();
    let rules = vec![rule("CAM")];
    let mut monitor = DriveMonitor::new();

    assert!(monitor.poll(&drives, &rules).is_empty());

    sim.attach("CAM", drive.path());
    assert_eq!(monitor.poll(&drives, &rules), vec![DriveEvent::Attached("CAM".into())]);

    drives.unmount("CAM").unwrap();
    assert_eq!(monitor.poll(&drives, &rules), vec![DriveEvent::Detached("CAM".into())]);
}
