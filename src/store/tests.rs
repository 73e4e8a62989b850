use super::*;
use crate::command::CommandMock;
use std::str::FromStr;
use tempfile::tempdir;

fn ts(s: &str) -> Timestamp {
    Timestamp::from_str(s).unwrap()
}

fn touch_snapshot(root: &Path, t: &Timestamp) {
    fs::create_dir_all(root.join("timestamp").join(t.as_str())).unwrap();
}

#[test]
fn list_skips_unparseable_entries_and_creates_missing_dir() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::new(dir.path(), Context::Local { user: "x".into() });

    fs::create_dir_all(dir.path().join("timestamp").join("not-a-timestamp")).unwrap();
    touch_snapshot(dir.path(), &ts("20240101_000000"));

    let listed = store.list().unwrap();
    assert_eq!(listed, vec![ts("20240101_000000")]);
}

#[test]
fn pin_is_idempotent_and_detects_conflicting_target() {
    let dir = tempdir().unwrap();
    let mut store = SnapshotStore::new(dir.path(), Context::Local { user: "x".into() });
    let t = ts("20240101_000000");
    touch_snapshot(dir.path(), &t);

    store.pin(&t).unwrap();
    store.pin(&t).unwrap(); // same target again: fine

    // manually replace the symlink with one pointing elsewhere
    fs::remove_file(dir.path().join("pinned").join(t.as_str())).unwrap();
    symlink("../timestamp/20240102_000000", dir.path().join("pinned").join(t.as_str())).unwrap();

    assert!(matches!(store.pin(&t), Err(IncrError::AlreadyExists(_))));
}

#[test]
fn clean_up_retains_now_and_pinned_and_deletes_the_rest() {
    let dir = tempdir().unwrap();
    let now = ts("20240110_060000");
    let old = ts("20230101_000000");
    let pinned = ts("20230601_000000");

    for t in [&now, &old, &pinned] {
        touch_snapshot(dir.path(), t);
    }

    let mock = CommandMock {
        commands: vec![(
            format!(
                "sudo btrfs subvolume delete \"{}\"",
                dir.path().join("timestamp").join(old.as_str()).display()
            ),
            Context::Local { user: "x".into() },
        )],
        responses: vec![Ok(String::new())],
    };
    let mut store = SnapshotStore::with_command(
        dir.path(),
        Context::Local { user: "x".into() },
        Box::new(mock),
    );
    store.pin(&pinned).unwrap();

    let limits = Limits {
        hourly: 0,
        daily: 0,
        weekly: 0,
        monthly: 0,
    };

    let survivors = store
        .clean_up(&now, &[now.clone(), old.clone(), pinned.clone()], &limits)
        .unwrap();

    assert_eq!(survivors, vec![pinned, now]);
}

#[test]
fn clean_up_keeps_newest_timestamp_within_a_bucket_index() {
    let dir = tempdir().unwrap();
    let now = ts("20240110_060000");
    let earlier_same_day = ts("20240110_000000");
    let later_same_day = ts("20240110_050000");

    for t in [&now, &earlier_same_day, &later_same_day] {
        touch_snapshot(dir.path(), t);
    }

    let mock = CommandMock {
        commands: vec![(
            format!(
                "sudo btrfs subvolume delete \"{}\"",
                dir.path().join("timestamp").join(earlier_same_day.as_str()).display()
            ),
            Context::Local { user: "x".into() },
        )],
        responses: vec![Ok(String::new())],
    };
    let mut store = SnapshotStore::with_command(
        dir.path(),
        Context::Local { user: "x".into() },
        Box::new(mock),
    );

    let limits = Limits {
        hourly: 0,
        daily: 1,
        weekly: 0,
        monthly: 0,
    };

    let survivors = store
        .clean_up(
            &now,
            &[now.clone(), earlier_same_day.clone(), later_same_day.clone()],
            &limits,
        )
        .unwrap();

    assert_eq!(survivors, vec![later_same_day, now]);
}

#[test]
fn clean_up_rebuilds_bucket_symlinks_from_scratch() {
    let dir = tempdir().unwrap();
    let now = ts("20240110_060000");
    let survivor = ts("20240109_060000");
    touch_snapshot(dir.path(), &now);
    touch_snapshot(dir.path(), &survivor);

    // stale symlink left over from a previous run, pointing at nothing
    fs::create_dir_all(dir.path().join("daily")).unwrap();
    symlink("../timestamp/does-not-exist", dir.path().join("daily").join("99")).unwrap();

    let mut store = SnapshotStore::with_command(
        dir.path(),
        Context::Local { user: "x".into() },
        Box::new(CommandMock {
            commands: vec![],
            responses: vec![],
        }),
    );

    let limits = Limits {
        hourly: 0,
        daily: 5,
        weekly: 0,
        monthly: 0,
    };

    store
        .clean_up(&now, &[now.clone(), survivor.clone()], &limits)
        .unwrap();

    assert!(!dir.path().join("daily").join("99").exists());
}
