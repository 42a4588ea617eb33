//! 终端客户端：展示会话状态并把命令转发给会话

use std::sync::Arc;

use futures_util::StreamExt;
use geoshare::{
    client::{ApiClient, DeviceGeolocation},
    config::ClientConfig,
    session::{Notice, SessionState, SharingSession, ToggleOutcome},
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Session = SharingSession<DeviceGeolocation, ApiClient>;

const HELP: &str = "commands: share | update | peers | copy | chat <user_id> <text> | history <user_id> | watch <user_id> | quit";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ClientConfig::from_env().expect("GEOSHARE_TOKEN must be set");
    let api = ApiClient::new(&config.api_url, &config.token).expect("Failed to build HTTP client");
    let geo = DeviceGeolocation::from_config(&config);

    let ctx = api.me().await.expect("Failed to load current user");
    println!(
        "Signed in as {} ({})",
        ctx.username.as_deref().unwrap_or("Unknown user"),
        ctx.user_id
    );

    let (session, mut notices) = SharingSession::new(geo, api.clone());
    session.start(ctx).await;

    let mut states = session.subscribe_state();
    print_state(&states.borrow_and_update());
    println!("{}", HELP);

    let watcher: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(notice) = notices.recv() => print_notice(&notice),
            Ok(()) = states.changed() => print_state(&states.borrow_and_update()),
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("Failed to read stdin: {}", e);
                        break;
                    }
                };
                if !run_command(line.trim(), &session, &api, &watcher).await {
                    break;
                }
            }
        }
    }

    if let Some(handle) = watcher.lock().await.take() {
        handle.abort();
    }
    session.teardown();
}

/// 执行一条命令，返回 false 表示退出
async fn run_command(
    line: &str,
    session: &Session,
    api: &ApiClient,
    watcher: &Mutex<Option<JoinHandle<()>>>,
) -> bool {
    let mut parts = line.splitn(3, ' ');
    match (parts.next().unwrap_or(""), parts.next(), parts.next()) {
        ("", _, _) => {}
        ("quit" | "exit", _, _) => return false,
        // 失败时会话已经发出错误通知
        ("share", _, _) => {
            if let Ok(ToggleOutcome::Ignored) = session.toggle_sharing().await {
                println!("Toggle ignored");
            }
        }
        ("update", _, _) => {
            if let Ok(None) = session.request_location().await {
                println!("Location result discarded");
            }
        }
        ("peers", _, _) => print_peers(&session.state()),
        ("copy", _, _) => match session.state().last_known_position {
            Some(coordinate) => println!("Copied: {}", coordinate.clipboard_text()),
            None => println!("No location to copy"),
        },
        ("chat", Some(peer), Some(text)) => match api.send_message(peer, text).await {
            Ok(message) => println!("[{}] you -> {}: {}", message.created_at, peer, message.content),
            Err(e) => println!("Failed to send message: {}", e),
        },
        ("history", Some(peer), None) => match api.conversation(peer).await {
            Ok(messages) if messages.is_empty() => println!("No messages with {}", peer),
            Ok(messages) => {
                for message in messages {
                    println!("[{}] {}: {}", message.created_at, message.sender_id, message.content);
                }
            }
            Err(e) => println!("Failed to load messages: {}", e),
        },
        ("watch", Some(peer), None) => {
            let stream = match api.subscribe_conversation(peer).await {
                Ok(stream) => stream,
                Err(e) => {
                    println!("Failed to watch {}: {}", peer, e);
                    return true;
                }
            };
            let handle = tokio::spawn(async move {
                let mut stream = stream;
                while let Some(message) = stream.next().await {
                    println!("[{}] {}: {}", message.created_at, message.sender_id, message.content);
                }
            });
            // 同一时间只关注一个会话
            if let Some(previous) = watcher.lock().await.replace(handle) {
                previous.abort();
            }
            println!("Watching messages with {}", peer);
        }
        _ => println!("{}", HELP),
    }
    true
}

fn print_notice(notice: &Notice) {
    match notice {
        Notice::LocationUpdated(coordinate) => {
            println!("Location updated: {}", coordinate.clipboard_text())
        }
        Notice::SharingEnabled => println!("Location sharing enabled"),
        Notice::SharingDisabled => println!("Location sharing disabled"),
        Notice::Error(e) => println!("Error: {}", e),
    }
}

fn print_state(state: &SessionState) {
    let position = state
        .last_known_position
        .map(|c| c.clipboard_text())
        .unwrap_or_else(|| "unknown".into());
    println!(
        "sharing={} position={} peers={}{}",
        if state.is_sharing { "on" } else { "off" },
        position,
        state.visible_peers.len(),
        if state.loading() { " (locating...)" } else { "" }
    );
}

fn print_peers(state: &SessionState) {
    if state.visible_peers.is_empty() {
        println!("No one else is sharing");
        return;
    }
    for peer in state.visible_peers.values() {
        println!(
            "{} ({}) at {} updated {}",
            peer.display_name(),
            peer.user_id,
            peer.coordinate().clipboard_text(),
            peer.updated_at
        );
    }
}
