#![cfg_attr(all(not(debug_assertions), target_os = "windows"), windows_subsystem = "windows")]

use chrono::Local;
use gmail_cleanup::auth::SessionAuthenticator;
use gmail_cleanup::cleanup::{self, CleanupSummary};
use gmail_cleanup::config::{self, Settings};
use gmail_cleanup::log_sink::{LogSink, MemoryLog};
use gmail_cleanup::models::{CleanupStatus, StatusPayload};
use gmail_cleanup::providers::GmailClient;
use tauri::{AppHandle, Manager, State, Window};
use tracing::{error, info, warn};

const LOG_EVENT: &str = "cleanup-log";
const STATUS_EVENT: &str = "cleanup-status";

struct AppState {
    authenticator: SessionAuthenticator,
    http: reqwest::Client,
    history: MemoryLog,
    run_guard: tokio::sync::Mutex<()>,
}

impl AppState {
    fn new(settings: Settings, http: reqwest::Client) -> Self {
        Self {
            authenticator: SessionAuthenticator::new(settings),
            http,
            history: MemoryLog::new(),
            run_guard: tokio::sync::Mutex::new(()),
        }
    }
}

/// Log sink for the window: keeps the history and forwards each line as an event.
struct GuiLog<'a> {
    app: AppHandle,
    history: &'a MemoryLog,
}

impl LogSink for GuiLog<'_> {
    fn log(&self, line: &str) {
        self.history.log(line);
        if let Err(err) = self.app.emit_all(LOG_EVENT, line) {
            warn!(?err, "failed to emit cleanup log event");
        }
    }

    fn status(&self, status: CleanupStatus) {
        if let Err(err) = self.app.emit_all(STATUS_EVENT, StatusPayload::from(status)) {
            warn!(?err, ?status, "failed to emit cleanup status event");
        }
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(config::log_filter())
        .try_init();
}

/// Modal message box; returns once the user dismisses it.
async fn show_dialog(window: &Window, title: &'static str, message: String) {
    let window = window.clone();
    let shown = tauri::async_runtime::spawn_blocking(move || {
        tauri::api::dialog::blocking::message(Some(&window), title, message)
    })
    .await;
    if let Err(err) = shown {
        warn!(?err, title, "dialog task failed");
    }
}

#[tauri::command]
async fn start_cleanup(
    app: AppHandle,
    window: Window,
    state: State<'_, AppState>,
) -> Result<CleanupSummary, String> {
    let Ok(_running) = state.run_guard.try_lock() else {
        warn!("start_cleanup requested while a run is in progress");
        return Err("A cleanup run is already in progress".into());
    };

    let log = GuiLog {
        app,
        history: &state.history,
    };

    log.status(CleanupStatus::Authenticating);
    log.log("🔐 Authenticating with Gmail...");
    let session = match state.authenticator.authenticate().await {
        Ok(session) => session,
        Err(err) => {
            error!(?err, "authentication failed");
            log.log(&format!("❌ Authentication error: {err}"));
            log.status(CleanupStatus::Failed);
            show_dialog(&window, "Error", format!("Cleanup failed: {err}")).await;
            return Err(err.to_string());
        }
    };
    log.log("✅ Authentication successful!");

    let client = GmailClient::new(state.http.clone(), session);
    let summary = cleanup::run_cleanup(&client, &log, Local::now().date_naive()).await;

    info!(
        archived = summary.archive.as_ref().map(|report| report.found),
        spam_deleted = summary.spam.as_ref().map(|report| report.reported_count()),
        spam_fallback = summary.spam.as_ref().map(|report| report.fallback_ran()),
        pass_errors = summary.errors.len(),
        "cleanup run finished"
    );
    log.status(CleanupStatus::Done);
    show_dialog(&window, "Done", "Email cleanup completed successfully!".into()).await;

    Ok(summary)
}

#[tauri::command]
fn log_history(state: State<'_, AppState>) -> Vec<String> {
    state.history.lines()
}

#[tauri::command]
fn clear_log(state: State<'_, AppState>) {
    state.history.clear();
}

#[tauri::command]
fn quit(app: AppHandle) {
    info!("quit requested");
    app.exit(0);
}

fn main() {
    init_tracing();

    tauri::Builder::default()
        .setup(|app| {
            let data_dir = app.path_resolver().app_data_dir();
            let settings = Settings::from_env(data_dir.as_deref());
            info!(?settings, "resolved credential locations");
            let http = reqwest::Client::builder()
                .user_agent(concat!("gmail-cleanup/", env!("CARGO_PKG_VERSION")))
                .build()?;
            app.manage(AppState::new(settings, http));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            start_cleanup,
            log_history,
            clear_log,
            quit
        ])
        .run(tauri::generate_context!())
        .expect("error while running gmail cleanup application");
}
