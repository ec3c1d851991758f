use super::*;
use crate::endpoint::{ExecOutput, MockCommand};
use chrono::TimeZone;

fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn name_round_trips() {
    let t = ts(2024, 1, 2, 3, 4, 5);
    let name = encode_name(t);
    assert_eq!(name, "sx-20240102-030405-utc");
    assert_eq!(decode_name(&name), Some(t));
}

#[test]
fn name_order_matches_timestamp_order() {
    let a = encode_name(ts(2024, 1, 1, 0, 0, 0));
    let b = encode_name(ts(2024, 1, 2, 0, 0, 0));
    assert!(a < b);
}

#[test]
fn decode_rejects_unmanaged_names() {
    assert_eq!(decode_name("not-a-snapshot"), None);
    assert_eq!(decode_name("sx-bogus-utc"), None);
    assert_eq!(decode_name("other-20240101-000000-utc"), None);
}

fn ok_output(stdout: &str) -> ExecOutput {
    ExecOutput {
        exit_code: 0,
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

#[test]
fn list_parses_and_sorts_managed_entries_only() {
    let mut mock = MockCommand::new();
    mock.expect_exec().returning(|_, _| {
        Ok(ok_output(
            "ID gen parent top level parent_uuid received_uuid uuid path\n\
             257 10 5 5 - - u1 backups/sx-20240102-030000-utc\n\
             258 11 5 5 - - u2 backups/not-managed\n\
             256 9 5 5 - - u3 backups/sx-20240101-030000-utc\n",
        ))
    });

    let store = BtrfsSnapshotStore::new(
        Endpoint::Local,
        "/data/src",
        "/data/backups",
        Arc::new(mock),
    );

    let list = store.list().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].timestamp, ts(2024, 1, 1, 3, 0, 0));
    assert_eq!(list[1].timestamp, ts(2024, 1, 2, 3, 0, 0));
}

#[test]
fn create_returns_name_collision_on_file_exists() {
    let mut mock = MockCommand::new();
    mock.expect_exec().returning(|endpoint, argv| {
        Err(SxError::Endpoint {
            endpoint: endpoint.display_id(),
            argv: argv.to_vec(),
            exit_code: 1,
            stderr_tail: "ERROR: File exists".to_string(),
        })
    });

    let store = BtrfsSnapshotStore::new(
        Endpoint::Local,
        "/data/src",
        "/data/backups",
        Arc::new(mock),
    );

    let err = store.create(ts(2024, 1, 1, 3, 0, 0)).unwrap_err();
    assert!(matches!(err, SxError::NameCollision(_)));
}

#[test]
fn delete_is_idempotent_for_missing_snapshot() {
    let mut mock = MockCommand::new();
    mock.expect_exec().returning(|endpoint, argv| {
        Err(SxError::Endpoint {
            endpoint: endpoint.display_id(),
            argv: argv.to_vec(),
            exit_code: 1,
            stderr_tail: "ERROR: cannot access '...': No such file or directory".to_string(),
        })
    });

    let store = BtrfsSnapshotStore::new(
        Endpoint::Local,
        "/data/src",
        "/data/backups",
        Arc::new(mock),
    );

    let snapshot = Snapshot {
        timestamp: ts(2024, 1, 1, 3, 0, 0),
        container_path: "/data/backups".to_string(),
    };
    assert!(store.delete(&snapshot).is_ok());
}

struct FakeStore {
    endpoint: Endpoint,
    container_path: String,
    snapshots: Vec<Snapshot>,
}

impl SnapshotStore for FakeStore {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
    fn container_path(&self) -> &str {
        &self.container_path
    }
    fn list(&self) -> Result<Vec<Snapshot>> {
        Ok(self.snapshots.clone())
    }
    fn create(&self, _now: DateTime<Utc>) -> Result<Snapshot> {
        unimplemented!()
    }
    fn delete(&self, _snapshot: &Snapshot) -> Result<()> {
        unimplemented!()
    }
}

#[test]
fn latest_common_matches_by_timestamp_only() {
    let a = Snapshot {
        timestamp: ts(2024, 1, 1, 3, 0, 0),
        container_path: "/src".to_string(),
    };
    let b = Snapshot {
        timestamp: ts(2024, 1, 2, 3, 0, 0),
        container_path: "/src".to_string(),
    };
    let c = Snapshot {
        timestamp: ts(2024, 1, 3, 3, 0, 0),
        container_path: "/src".to_string(),
    };

    let source = FakeStore {
        endpoint: Endpoint::Local,
        container_path: "/src".to_string(),
        snapshots: vec![a.clone(), b.clone(), c],
    };
    let dest = FakeStore {
        endpoint: Endpoint::Local,
        container_path: "/dst".to_string(),
        snapshots: vec![a.clone(), b.clone()],
    };

    let common = source.latest_common(&dest).unwrap();
    assert_eq!(common, Some(b));
}

#[test]
fn latest_common_none_when_no_overlap() {
    let a = Snapshot {
        timestamp: ts(2024, 1, 1, 3, 0, 0),
        container_path: "/src".to_string(),
    };
    let source = FakeStore {
        endpoint: Endpoint::Local,
        container_path: "/src".to_string(),
        snapshots: vec![a],
    };
    let dest = FakeStore {
        endpoint: Endpoint::Local,
        container_path: "/dst".to_string(),
        snapshots: vec![],
    };

    assert_eq!(source.latest_common(&dest).unwrap(), None);
}
