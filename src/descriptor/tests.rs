use super::*;
use crate::endpoint::{ExecOutput, MockCommand};

fn sample() -> JobDescriptor {
    JobDescriptor {
        source: Some("/data/src".to_string()),
        destination: Some("ssh://backup.example.com/srv/vault".to_string()),
        source_container: "/data/src/.sxbackup".to_string(),
        destination_container: "/srv/vault".to_string(),
        source_retention: "3".to_string(),
        destination_retention: "1d:4/d, 1w:daily, 2m:none".to_string(),
        compress: true,
        format_version: CURRENT_FORMAT_VERSION,
        last_synced: Some("sx-20240101-030000-utc".to_string()),
        unknown: BTreeMap::new(),
    }
}

#[test]
fn render_then_parse_round_trips() {
    let original = sample();
    let parsed = JobDescriptor::parse(&original.render()).unwrap();
    assert_eq!(parsed, original);
}

#[test]
fn parse_preserves_unknown_keys() {
    let text = "[Job]\nsource-container=/a\ndestination-container=/b\nformat-version=1\nfuture-key=kept\n";
    let parsed = JobDescriptor::parse(text).unwrap();
    assert_eq!(parsed.unknown.get("future-key"), Some(&"kept".to_string()));

    let rendered = parsed.render();
    assert!(rendered.contains("future-key=kept"));
}

#[test]
fn parse_rejects_newer_major_format_version() {
    let text = format!(
        "[Job]\nsource-container=/a\ndestination-container=/b\nformat-version={}\n",
        CURRENT_FORMAT_VERSION + 1
    );
    assert!(JobDescriptor::parse(&text).is_err());
}

#[test]
fn parse_defaults_missing_optional_fields() {
    let text = "[Job]\nsource-container=/a\ndestination-container=/b\n";
    let parsed = JobDescriptor::parse(text).unwrap();
    assert_eq!(parsed.compress, false);
    assert_eq!(parsed.source_retention, "");
    assert_eq!(parsed.format_version, 1);
}

#[test]
fn store_read_returns_none_when_file_missing() {
    let mut mock = MockCommand::new();
    mock.expect_exec().returning(|endpoint, argv| {
        Err(SxError::Endpoint {
            endpoint: endpoint.display_id(),
            argv: argv.to_vec(),
            exit_code: 1,
            stderr_tail: "cat: /srv/vault/.btrfs-sxbackup: No such file or directory".to_string(),
        })
    });

    let store = FileDescriptorStore::new(Arc::new(mock));
    let result = store.read(&Endpoint::Local, "/srv/vault").unwrap();
    assert!(result.is_none());
}

#[test]
fn store_read_parses_file_contents() {
    let descriptor = sample();
    let rendered = descriptor.render();

    let mut mock = MockCommand::new();
    mock.expect_exec().returning(move |_, _| {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: rendered.clone().into_bytes(),
            stderr: Vec::new(),
        })
    });

    let store = FileDescriptorStore::new(Arc::new(mock));
    let result = store.read(&Endpoint::Local, "/srv/vault").unwrap();
    assert_eq!(result, Some(descriptor));
}

#[test]
fn store_write_sends_rendered_contents_on_stdin() {
    let descriptor = sample();
    let expected = descriptor.render();

    let mut mock = MockCommand::new();
    mock.expect_exec_with_stdin()
        .withf(move |_, argv, stdin| {
            argv[0] == "sh" && String::from_utf8_lossy(stdin) == expected
        })
        .returning(|_, _, _| {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        });

    let store = FileDescriptorStore::new(Arc::new(mock));
    store
        .write(&Endpoint::Local, "/srv/vault", &descriptor)
        .unwrap();
}

#[test]
fn store_delete_removes_the_descriptor_file() {
    let mut mock = MockCommand::new();
    mock.expect_exec()
        .withf(|_, argv| {
            argv[0] == "sh" && argv[2].contains("rm -f") && argv[2].contains(".btrfs-sxbackup")
        })
        .returning(|_, _| {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: Vec::new(),
                stderr: Vec::new(),
            })
        });

    let store = FileDescriptorStore::new(Arc::new(mock));
    store.delete(&Endpoint::Local, "/srv/vault").unwrap();
}

#[test]
fn store_delete_is_idempotent_for_missing_file() {
    let mut mock = MockCommand::new();
    mock.expect_exec().returning(|_, _| {
        Ok(ExecOutput {
            exit_code: 0,
            stdout: Vec::new(),
            stderr: Vec::new(),
        })
    });

    let store = FileDescriptorStore::new(Arc::new(mock));
    assert!(store.delete(&Endpoint::Local, "/srv/vault").is_ok());
}
