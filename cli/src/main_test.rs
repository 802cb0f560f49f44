use super::*;

#[test]
fn server_error_reads_api_error_body() {
    let err = server_error(403, r#"{"code":"E_ADMIN_REQUIRED","message":"admin mode required","retryable":false}"#);
    assert_eq!(err.to_string(), "HTTP 403 E_ADMIN_REQUIRED: admin mode required");
}

#[test]
fn server_error_falls_back_to_raw_body() {
    let err = server_error(502, "  bad gateway\n");
    assert_eq!(err.to_string(), "HTTP 502 E_HTTP: bad gateway");
}

#[test]
fn export_paths() {
    assert_eq!(export_path(None, false), "/api/export.json");
    assert_eq!(export_path(None, true), "/api/export.txt");
    assert_eq!(export_path(Some(7), false), "/api/policies/7/export.json");
    assert_eq!(export_path(Some(7), true), "/api/policies/7/export.txt");
}

#[test]
fn query_is_percent_encoded() {
    assert_eq!(encode_query("remote access"), "remote%20access");
    assert_eq!(encode_query("a&b=c"), "a%26b%3Dc");
    assert_eq!(encode_query("Backup-1.0_x~"), "Backup-1.0_x~");
}

#[test]
fn parses_nested_sync_command() {
    let cli = Cli::try_parse_from(["portal", "sync", "connect", "https://example.com/p.json"]).unwrap();
    match cli.command {
        Command::Sync(SyncCommand { command: SyncSubcommand::Connect { url } }) => {
            assert_eq!(url, "https://example.com/p.json");
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parses_export_flags() {
    let cli = Cli::try_parse_from(["portal", "--base-url", "http://h:1/", "export", "--id", "3", "--text"]).unwrap();
    assert_eq!(cli.base_url, "http://h:1/");
    match cli.command {
        Command::Export(args) => {
            assert_eq!(args.id, Some(3));
            assert!(args.text);
            assert!(args.output.is_none());
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn show_requires_numeric_id() {
    assert!(Cli::try_parse_from(["portal", "show", "abc"]).is_err());
}
