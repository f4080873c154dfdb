use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use vimo_desktop::api::classify::notification_for;
use vimo_desktop::api::VimoApi;
use vimo_desktop::batch::{
    format_processing_time, submit_batch, BatchStatus, BatchStatusPoller, PROCESSING_FAILED_TEXT,
};
use vimo_desktop::chat::{AskOutcome, ChatHistory, Conversation, ConversationOptions, Message, Role};
use vimo_desktop::collector::{CollectorOptions, VideoCollector};
use vimo_desktop::config::{
    clear_settings, get_database_path, get_settings_file_path, load_config, ClientConfig,
    SettingsPatch,
};
use vimo_desktop::error::VimoError;
use vimo_desktop::events::{EventBus, ProcessingEventPayload, TranscriptEventHandler};
use vimo_desktop::logging::{init_logging, read_component_logs};
use vimo_desktop::settings::{load_settings, save_settings};
use vimo_desktop::shutdown::ShutdownCoordinator;
use vimo_desktop::storage::{ChatSessionStorage, SqliteStore};
use vimo_desktop::validation::format_file_size;

const USAGE: &str = "\
usage: vimo <command> [args]

commands:
  status                          backend health and system status
  settings [show|save <json>|reset]
  videos                          list the backend's video library
  upload <chat> <path>...         index videos into a chat and follow progress
  upload-web <chat> <path>...     hand already-staged files to the backend
  indexed <chat>                  list the videos a chat has indexed
  duration <path>                 probe a video's length on the backend
  imagebind [status|load|release] manage the shared ImageBind model
  ask <chat> <question>           ask a question about a chat's videos
  history <chat>                  print a chat transcript
  sessions                        list saved chats
  clear <chat>                    delete a chat's local history
  terminate <chat>                stop a chat's backend processes
  delete <chat>                   delete a chat on the backend and locally
  logs [component]                show recent log entries";

struct App {
    config: ClientConfig,
    api: Arc<VimoApi>,
    storage: ChatSessionStorage,
    shutdown: ShutdownCoordinator,
}

impl App {
    fn new() -> Result<Self> {
        let config = load_config().context("failed to load config")?;
        let api = VimoApi::from_config(&config)?;
        let store = SqliteStore::open(&get_database_path()?)?;

        Ok(Self {
            config,
            api: Arc::new(api),
            storage: ChatSessionStorage::new(Arc::new(store)),
            shutdown: ShutdownCoordinator::new(),
        })
    }

    /// Ctrl-C cancels whatever is waiting on the network
    fn watch_interrupt(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted");
                shutdown.shutdown();
            }
        });
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<VimoError>() {
                Some(err) => eprintln!("{}\n  ({})", notification_for(err), err),
                None => eprintln!("error: {:#}", e),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Vec<String>) -> Result<()> {
    let Some((command, rest)) = args.split_first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    if command == "logs" {
        return show_logs(rest.first().map(String::as_str).unwrap_or("app"));
    }
    if matches!(command.as_str(), "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let app = App::new()?;
    match (command.as_str(), rest) {
        ("status", []) => status(&app).await,
        ("settings", []) => settings_show(&app).await,
        ("settings", [sub]) if sub == "show" => settings_show(&app).await,
        ("settings", [sub, json]) if sub == "save" => settings_save(&app, json).await,
        ("settings", [sub]) if sub == "reset" => {
            clear_settings()?;
            println!("Saved settings removed");
            Ok(())
        }
        ("videos", []) => videos(&app).await,
        ("upload", [chat, paths @ ..]) if !paths.is_empty() => upload(&app, chat, paths).await,
        ("upload-web", [chat, paths @ ..]) if !paths.is_empty() => {
            let response = app.api.upload_videos_web(chat, paths).await?;
            println!(
                "{} videos queued: {}",
                response.video_count,
                response.video_names.join(", ")
            );
            Ok(())
        }
        ("indexed", [chat]) => {
            let indexed = app.api.get_indexed_videos(chat).await?;
            for path in &indexed.indexed_videos {
                println!("  {}", path);
            }
            println!("{} indexed", indexed.total_count);
            Ok(())
        }
        ("duration", [path]) => {
            let info = app.api.get_video_duration(path).await?;
            print!("{}", format_processing_time(info.duration));
            if let (Some(width), Some(height)) = (info.width, info.height) {
                print!("  {}x{}", width, height);
            }
            if let Some(fps) = info.fps {
                print!("  {:.2} fps", fps);
            }
            println!();
            Ok(())
        }
        ("imagebind", []) => imagebind_status(&app).await,
        ("imagebind", [sub]) if sub == "status" => imagebind_status(&app).await,
        ("imagebind", [sub]) if sub == "load" => {
            let ack = app.api.load_imagebind().await?;
            println!("{}", ack.message.unwrap_or_else(|| "ImageBind loaded".into()));
            Ok(())
        }
        ("imagebind", [sub]) if sub == "release" => {
            let ack = app.api.release_imagebind().await?;
            println!("{}", ack.message.unwrap_or_else(|| "ImageBind released".into()));
            Ok(())
        }
        ("ask", [chat, words @ ..]) if !words.is_empty() => ask(&app, chat, &words.join(" ")).await,
        ("history", [chat]) => history(&app, chat).await,
        ("sessions", []) => sessions(&app),
        ("clear", [chat]) => clear(&app, chat).await,
        ("terminate", [chat]) => {
            let ack = app.api.terminate_session(chat).await?;
            println!("{}", ack.message.unwrap_or_else(|| "Session terminated".into()));
            Ok(())
        }
        ("delete", [chat]) => {
            let ack = app.api.delete_session(chat).await?;
            app.storage.delete(chat)?;
            println!("{}", ack.message.unwrap_or_else(|| "Session deleted".into()));
            Ok(())
        }
        _ => bail!("unrecognised command\n\n{}", USAGE),
    }
}

async fn status(app: &App) -> Result<()> {
    let health = app.api.health_check().await?;
    println!("backend: {} ({})", app.api.base_url(), health.status);

    let system = app.api.get_system_status().await?;
    println!("configured: {}", system.global_config_set);
    println!(
        "imagebind: initialized={} loaded={}",
        system.imagebind_initialized, system.imagebind_loaded
    );
    println!(
        "sessions: {}  indexed videos: {}",
        system.total_sessions, system.total_indexed_videos
    );
    Ok(())
}

async fn imagebind_status(app: &App) -> Result<()> {
    let status = app.api.get_imagebind_status().await?;
    println!(
        "initialized={} loaded={} uses={}{}",
        status.initialized,
        status.loaded,
        status.total_usage_count,
        status.device.map(|d| format!(" device={}", d)).unwrap_or_default()
    );
    Ok(())
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        let tail: String = secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{}", tail)
    }
}

async fn settings_show(app: &App) -> Result<()> {
    let mut settings = load_settings(&app.api, &get_settings_file_path()?).await;
    settings.openai_api_key = mask(&settings.openai_api_key);
    settings.dashscope_api_key = mask(&settings.dashscope_api_key);
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

async fn settings_save(app: &App, json: &str) -> Result<()> {
    let patch: SettingsPatch =
        serde_json::from_str(json).context("settings must be a JSON object")?;
    let path = get_settings_file_path()?;

    let mut settings = load_settings(&app.api, &path).await;
    settings.apply(&patch);

    let outcome = save_settings(&app.api, &path, &settings).await?;
    match (outcome.initialized, outcome.backend_error) {
        (Some(true), _) => println!("Settings saved; backend initialized"),
        (Some(false), _) => println!("Settings saved; backend updated"),
        (None, Some(error)) => println!("Settings saved locally; backend not updated: {}", error),
        (None, None) => println!("Settings saved"),
    }
    Ok(())
}

async fn videos(app: &App) -> Result<()> {
    let library = app.api.get_available_videos().await?;
    if let Some(base) = &library.base_path {
        println!("{}", base);
    }
    let mut count = 0;
    for item in &library.items {
        for file in item.files() {
            count += 1;
            let size = file.size.map(format_file_size).unwrap_or_default();
            println!("  {}  {}", file.relative_path.as_deref().unwrap_or(&file.path), size);
        }
    }
    println!("{} videos", count);
    Ok(())
}

async fn upload(app: &App, chat_id: &str, paths: &[String]) -> Result<()> {
    let collector = VideoCollector::new(CollectorOptions::from_config(&app.config));
    let selection = collector
        .scan_paths(paths.iter().map(PathBuf::from).collect(), |progress| {
            if progress.visited == progress.total {
                eprintln!("scanned {} entries", progress.total);
            }
        })
        .await?;

    for skipped in &selection.skipped {
        eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
    }
    println!(
        "Uploading {} videos ({})",
        selection.video_count,
        format_file_size(selection.total_size)
    );

    let items = submit_batch(app.api.as_ref(), chat_id, &selection.files).await?;

    let history = Arc::new(ChatHistory::open(app.storage.clone(), chat_id).await);
    let names: Vec<String> = items.iter().map(|i| i.name.clone()).collect();
    let note = Message::new(Role::User, format!("Uploaded {} videos", names.len())).with_videos(names);
    if !history.add_message(note).await {
        eprintln!("warning: {}", history.last_error().await.unwrap_or_default());
    }

    app.watch_interrupt();
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let transcript =
        TranscriptEventHandler::new(bus.clone(), history.clone(), app.shutdown.clone()).start();

    let poller = BatchStatusPoller::with_interval(
        app.api.clone(),
        chat_id,
        bus.clone(),
        app.config.poll_interval(),
    )
    .with_cancellation(app.shutdown.child_token());
    if !poller.initialize_processing(items) {
        bail!("polling could not be started for chat {}", chat_id);
    }

    let mut shutdown_rx = app.shutdown.subscribe();
    let result = loop {
        tokio::select! {
            event = rx.recv() => {
                let Ok(event) = event else { continue };
                match event.payload {
                    ProcessingEventPayload::StateChanged { completed, failed, total, overall_progress, status, current_video } => {
                        println!(
                            "[{:>3}%] {}/{} done, {} failed{}",
                            overall_progress,
                            completed,
                            total,
                            failed,
                            current_video.map(|v| format!(" - {}", v)).unwrap_or_default()
                        );
                        // Terminal events are published right behind this one; a
                        // finished state with nothing queued means the poller is done.
                        if poller.state().is_finished() && rx.is_empty() {
                            break match status {
                                BatchStatus::Error => Err(anyhow!(
                                    "processing failed: {}",
                                    poller.last_error().unwrap_or_else(|| PROCESSING_FAILED_TEXT.to_string())
                                )),
                                _ => Ok(()),
                            };
                        }
                    }
                    ProcessingEventPayload::VideoCompleted { name, .. } => println!("{} indexed", name),
                    ProcessingEventPayload::StatusFetchFailed { error } => eprintln!("status check failed: {}", error),
                    ProcessingEventPayload::BatchCompleted { completed, total, .. } => {
                        let state = poller.state();
                        let took = state
                            .start_time
                            .zip(state.end_time)
                            .map(|(start, end)| format_processing_time((end - start).num_seconds() as f64))
                            .unwrap_or_default();
                        println!("Processed {}/{} videos in {}", completed, total, took);
                        break Ok(());
                    }
                    ProcessingEventPayload::BatchFailed { error } => {
                        break Err(anyhow!("processing failed: {}", error));
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                poller.stop();
                break Err(anyhow!(VimoError::Cancelled));
            }
        }
    };

    // Let the transcript catch up before exiting
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    app.shutdown.shutdown();
    let _ = transcript.await;
    result
}

async fn ask(app: &App, chat_id: &str, question: &str) -> Result<()> {
    app.watch_interrupt();
    let history = Arc::new(ChatHistory::open(app.storage.clone(), chat_id).await);
    let options = ConversationOptions {
        poll_interval: app.config.poll_interval(),
        max_wait: app.config.query_timeout(),
    };
    let conversation = Conversation::new(app.api.clone(), history, options)
        .with_cancellation(app.shutdown.child_token());

    match conversation.ask(question).await? {
        AskOutcome::Answered(answer) => {
            println!("{}", answer);
            Ok(())
        }
        AskOutcome::Failed(reason) => bail!("the question could not be answered: {}", reason),
    }
}

async fn history(app: &App, chat_id: &str) -> Result<()> {
    let history = ChatHistory::open(app.storage.clone(), chat_id).await;
    if let Some(error) = history.last_error().await {
        eprintln!("warning: {}", error);
    }
    for message in history.messages().await {
        let who = match message.role {
            Role::User => "you",
            Role::Assistant => "vimo",
        };
        println!(
            "[{}] {}: {}",
            message.timestamp.format("%Y-%m-%d %H:%M"),
            who,
            message.content
        );
    }
    Ok(())
}

fn sessions(app: &App) -> Result<()> {
    for chat_id in app.storage.list_all_ids()? {
        let load = app.storage.load(&chat_id);
        let session = load.session;
        println!(
            "{}  {}  ({} videos, {} messages)  {}",
            chat_id,
            session.title,
            session.video_count,
            session.messages.len(),
            session.last_message
        );
    }
    Ok(())
}

async fn clear(app: &App, chat_id: &str) -> Result<()> {
    let history = ChatHistory::open(app.storage.clone(), chat_id).await;
    if !history.clear_messages().await {
        bail!(history
            .last_error()
            .await
            .unwrap_or_else(|| format!("chat {} cannot be cleared", chat_id)));
    }
    println!("Cleared {}", chat_id);
    Ok(())
}

fn show_logs(component: &str) -> Result<()> {
    let entries = read_component_logs(component, Some(50)).map_err(VimoError::from)?;
    for entry in entries.into_iter().rev() {
        println!(
            "{} {:<5} {}",
            entry.timestamp, entry.level, entry.message
        );
    }
    Ok(())
}
