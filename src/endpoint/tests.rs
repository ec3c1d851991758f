use super::*;

fn s(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

#[test]
fn parse_local_path() {
    let (ep, path) = parse_endpoint_url("/data/backups").unwrap();
    assert_eq!(ep, Endpoint::Local);
    assert_eq!(path, "/data/backups");
}

#[test]
fn parse_remote_with_user_and_port() {
    let (ep, path) = parse_endpoint_url("ssh://admin@backup.example.com:2222/srv/vault").unwrap();
    assert_eq!(
        ep,
        Endpoint::Remote {
            user: Some("admin".to_string()),
            host: "backup.example.com".to_string(),
            port: Some(2222),
        }
    );
    assert_eq!(path, "/srv/vault");
}

#[test]
fn parse_remote_without_user() {
    let (ep, path) = parse_endpoint_url("ssh://backup.example.com/srv/vault").unwrap();
    assert_eq!(
        ep,
        Endpoint::Remote {
            user: None,
            host: "backup.example.com".to_string(),
            port: None,
        }
    );
    assert_eq!(path, "/srv/vault");
}

#[test]
fn parse_remote_missing_path_is_error() {
    assert!(parse_endpoint_url("ssh://host").is_err());
}

#[test]
fn parse_remote_bad_port_is_error() {
    assert!(parse_endpoint_url("ssh://host:notaport/path").is_err());
}

#[test]
fn url_roundtrip() {
    let ep = Endpoint::Remote {
        user: Some("bob".to_string()),
        host: "h".to_string(),
        port: Some(22),
    };
    let url = ep.to_url("/a/b");
    let (parsed, path) = parse_endpoint_url(&url).unwrap();
    assert_eq!(parsed, ep);
    assert_eq!(path, "/a/b");
}

#[test]
fn same_host_ignores_user() {
    let a = Endpoint::Remote {
        user: Some("alice".into()),
        host: "h".into(),
        port: None,
    };
    let b = Endpoint::Remote {
        user: Some("bob".into()),
        host: "h".into(),
        port: None,
    };
    assert!(a.same_host(&b));

    let c = Endpoint::Remote {
        user: None,
        host: "other".into(),
        port: None,
    };
    assert!(!a.same_host(&c));
    assert!(Endpoint::Local.same_host(&Endpoint::Local));
    assert!(!Endpoint::Local.same_host(&a));
}

#[test]
fn shell_quote_escapes_single_quotes() {
    let argv = s(&["btrfs", "subvolume", "snapshot", "-r", "it's/a/path", "dst"]);
    let quoted = shell_quote(&argv);
    assert_eq!(quoted, "btrfs subvolume snapshot -r 'it'\\''s/a/path' dst");
}

#[test]
fn shell_quote_leaves_plain_words_bare() {
    let argv = s(&["btrfs", "send", "-p", "/snap/a"]);
    assert_eq!(shell_quote(&argv), "btrfs send -p /snap/a");
}

#[test]
fn exec_captures_nonzero_exit_with_stderr_tail() {
    let cmd = CommandSystem;
    let argv = s(&["sh", "-c", "echo boom 1>&2; exit 3"]);
    let err = cmd.exec(&Endpoint::Local, &argv).unwrap_err();
    match err {
        SxError::Endpoint {
            exit_code,
            stderr_tail,
            ..
        } => {
            assert_eq!(exit_code, 3);
            assert!(stderr_tail.contains("boom"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn exec_captures_stdout_on_success() {
    let cmd = CommandSystem;
    let argv = s(&["echo", "hello"]);
    let out = cmd.exec(&Endpoint::Local, &argv).unwrap();
    assert_eq!(out.stdout_string().trim(), "hello");
}
