/// Folders split the way editors pick them: free ones, and the ones someone holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusView {
    pub available: Vec<String>,
    pub in_use: Vec<InUseFolder>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InUseFolder {
    pub folder: String,
    pub editor: String,
    pub status: FolderStatus,
}

pub fn status_view(report: &ReconcileReport) -> StatusView {
    let mut view = StatusView::default();
    for (folder, status) in &report.folders {
        match status {
            FolderStatus::Available => view.available.push(folder.clone()),
            status => view.in_use.push(InUseFolder {
                folder: folder.clone(),
                editor: report
                    .editors
                    .get(folder)
                    .cloned()
                    .unwrap_or_else(|| NO_EDITOR.to_string()),
                status: *status,
            }),
        }
    }
    view
}

pub fn render_status(view: &StatusView) -> String {
    let mut out = String::from("Available:\n");
    if view.available.is_empty() {
        out.push_str("  (none)\n");
    }
    for folder in &view.available {
        out.push_str(&format!("  {folder}\n"));
    }
    out.push_str("In use:\n");
    if view.in_use.is_empty() {
        out.push_str("  (none)\n");
    }
    for entry in &view.in_use {
        out.push_str(&format!(
            "  {} - {} ({})\n",
            entry.folder, entry.editor, entry.status
        ));
    }
    out
}

fn token_provider(config: &RuntimeConfig) -> anyhow::Result<TokenProvider> {
    if let Some(token) = &config.static_token {
        return Ok(TokenProvider::fixed(token.clone()));
    }
    let credentials = Credentials::from_file(&config.credentials_path).with_context(|| {
        format!(
            "failed to load spreadsheet credentials from {}",
            config.credentials_path.display()
        )
    })?;
    match credentials {
        Credentials::AuthorizedUser(user) => {
            let oauth_client =
                OAuthClient::from_credentials(&user).context("invalid oauth client config")?;
            Ok(TokenProvider::from_refresh_token(user.refresh_token, oauth_client))
        }
        Credentials::ServiceAccount(key) => {
            let client = ServiceAccountClient::new(&key)
                .context("invalid service account key")?;
            info!(account = client.client_email(), "using service account credentials");
            Ok(TokenProvider::from_service_account(client))
        }
    }
}

fn prompt_editor() -> Option<String> {
    {
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "Editor name: ").ok()?;
        stdout.flush().ok()?;
    }
    read_answer(std::io::stdin().lock())
}

fn read_answer<R: BufRead>(mut input: R) -> Option<String> {
    let mut line = String::new();
    match input.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()).filter(|answer| !answer.is_empty()),
    }
}

/// Resolves on the first Ctrl-C; never resolves when the handler cannot be
/// installed.
async fn ctrl_c_pressed(flag: &AtomicBool) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("cannot listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
    flag.store(true, Ordering::Relaxed);
}

fn discard_pending(events: &mut mpsc::UnboundedReceiver<EngineEvent>) -> usize {
    let mut discarded = 0;
    while events.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}

async fn log_events(mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match &event {
            EngineEvent::Error { .. } => warn!("{}", event.render()),
            EngineEvent::Progress { .. } => tracing::debug!("{}", event.render()),
            _ => info!("{}", event.render()),
        }
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            EngineEvent::Error { .. } => eprintln!("{}", event.render()),
            EngineEvent::StateChanged { .. } => tracing::debug!("{}", event.render()),
            _ => println!("{}", event.render()),
        }
    }
}
