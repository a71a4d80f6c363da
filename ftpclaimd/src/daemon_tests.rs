use super::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

fn runtime_config(settings_path: PathBuf) -> RuntimeConfig {
    RuntimeConfig {
        credentials_path: settings_path.with_file_name("credentials.json"),
        settings_path,
        download_root: std::env::temp_dir(),
        poll_interval: Duration::from_secs(60),
        connect_timeout: Duration::from_secs(5),
        claim_jitter: None,
        static_token: Some("token".into()),
        worksheet: None,
    }
}

#[test]
fn status_view_splits_available_and_in_use() {
    let report = ReconcileReport {
        folders: BTreeMap::from([
            ("A".to_string(), FolderStatus::Available),
            ("B".to_string(), FolderStatus::InProgress),
            ("C".to_string(), FolderStatus::Downloaded),
        ]),
        editors: BTreeMap::from([("C".to_string(), "alice".to_string())]),
        seeded: Vec::new(),
    };

    let view = status_view(&report);

    assert_eq!(view.available, vec!["A".to_string()]);
    assert_eq!(view.in_use.len(), 2);
    assert_eq!(view.in_use[0].editor, NO_EDITOR);
    assert_eq!(view.in_use[1].editor, "alice");
    assert_eq!(view.in_use[1].status, FolderStatus::Downloaded);
}

#[test]
fn renders_status_text() {
    let view = StatusView {
        available: vec!["A".into()],
        in_use: vec![InUseFolder {
            folder: "B".into(),
            editor: "bob".into(),
            status: FolderStatus::InProgress,
        }],
    };
    assert_eq!(
        render_status(&view),
        "Available:\n  A\nIn use:\n  B - bob (in progress)\n"
    );
    assert_eq!(
        render_status(&StatusView::default()),
        "Available:\n  (none)\nIn use:\n  (none)\n"
    );
}

#[test]
fn status_view_serializes_snake_case_statuses() {
    let view = StatusView {
        available: Vec::new(),
        in_use: vec![InUseFolder {
            folder: "B".into(),
            editor: NO_EDITOR.into(),
            status: FolderStatus::InProgress,
        }],
    };
    let json = serde_json::to_value(&view).unwrap();
    assert_eq!(json["in_use"][0]["status"], "in_progress");
    assert_eq!(json["in_use"][0]["editor"], "Sin Editor");
}

#[test]
fn read_answer_trims_and_rejects_blank() {
    assert_eq!(read_answer(&b"  dana \n"[..]), Some("dana".to_string()));
    assert_eq!(read_answer(&b"   \n"[..]), None);
    assert_eq!(read_answer(&b""[..]), None);
}

#[test]
fn discard_pending_empties_the_queue_but_keeps_it_open() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    for folder in ["A", "B"] {
        tx.send(EngineEvent::StateChanged {
            folder: folder.into(),
            status: FolderStatus::Available,
        })
        .unwrap();
    }

    assert_eq!(discard_pending(&mut rx), 2);
    assert_eq!(discard_pending(&mut rx), 0);

    tx.send(EngineEvent::Finished {
        folder: "A".into(),
        message: "done".into(),
    })
    .unwrap();
    assert!(matches!(rx.try_recv(), Ok(EngineEvent::Finished { .. })));
}

#[test]
fn bootstrap_reports_missing_settings() {
    let dir = tempdir().unwrap();
    let config = runtime_config(dir.path().join("ftp_config.json"));

    let err = DaemonRuntime::bootstrap(config).err().unwrap();
    let message = format!("{err:#}");
    assert!(message.contains("incomplete"), "{message}");
    assert!(message.contains("ftp.host"), "{message}");
}

#[test]
fn bootstrap_builds_engine_from_complete_settings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ftp_config.json");
    crate::config::SettingsStore::new(&path)
        .save(&crate::config::FtpSettings {
            host: Some("127.0.0.1:2121".into()),
            user: Some("editor".into()),
            password: Some("secret".into()),
            base_path: Some("uploads".into()),
            google_sheet_url: Some("https://docs.google.com/spreadsheets/d/doc-7/edit".into()),
        })
        .unwrap();

    let runtime = DaemonRuntime::bootstrap(runtime_config(path)).unwrap();
    assert!(runtime.engine().folder_states().is_empty());
}

#[test]
fn bootstrap_without_credentials_file_fails() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ftp_config.json");
    crate::config::SettingsStore::new(&path)
        .save(&crate::config::FtpSettings {
            host: Some("ftp.example.com".into()),
            user: Some("editor".into()),
            password: Some("secret".into()),
            base_path: Some("/".into()),
            google_sheet_url: Some("https://docs.google.com/spreadsheets/d/doc-7/edit".into()),
        })
        .unwrap();
    let mut config = runtime_config(path);
    config.static_token = None;

    let err = DaemonRuntime::bootstrap(config).err().unwrap();
    assert!(format!("{err:#}").contains("credentials"));
}

#[test]
fn bootstrap_accepts_service_account_key_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ftp_config.json");
    crate::config::SettingsStore::new(&path)
        .save(&crate::config::FtpSettings {
            host: Some("ftp.example.com".into()),
            user: Some("editor".into()),
            password: Some("secret".into()),
            base_path: Some("/".into()),
            google_sheet_url: Some("https://docs.google.com/spreadsheets/d/doc-7/edit".into()),
        })
        .unwrap();
    let mut config = runtime_config(path);
    config.static_token = None;
    std::fs::write(
        &config.credentials_path,
        serde_json::json!({
            "type": "service_account",
            "client_email": "ledger@example.iam.gserviceaccount.com",
            "private_key": include_str!("../../ftpclaim-core/tests/fixtures/service_account_key.pem"),
            "private_key_id": "kid-1"
        })
        .to_string(),
    )
    .unwrap();

    assert!(DaemonRuntime::bootstrap(config).is_ok());
}
