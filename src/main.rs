use std::{
    process,
    sync::{Arc, OnceLock},
};

use mqttchat::{
    chat::{self, Input},
    config::Config,
    core::{probe::ProbeMonitor, store::ConfigStore},
    logger::LoggerManager,
    print_error,
};
use mqttchat_session::{always_online, RumqttcConnector, Session, SessionError};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};
use tracing::{debug, error, info, warn};

static CONFIG: OnceLock<Config> = OnceLock::new();

pub fn config() -> &'static Config {
    CONFIG.get_or_init(|| {
        Config::new().unwrap_or_else(|e| {
            print_error!("{}", e);
            process::exit(1);
        })
    })
}

/// Prints live updates until the session goes away.
async fn print_updates(session: Session) {
    let mut updates = session.subscribe_updates();
    loop {
        match updates.recv().await {
            Ok(update) => {
                if let Some(line) = chat::render_update(&update) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Console lagged, {skipped} updates skipped"),
            Err(RecvError::Closed) => break,
        }
    }
}

/// Handles one input line. Returns `false` to quit.
async fn handle_input(
    session: &Session,
    store: &ConfigStore,
    input: Input,
) -> Result<bool, SessionError> {
    match input {
        Input::Say(text) => session.publish(text, false).await?,
        Input::SayRetained(text) => session.publish(text, true).await?,
        Input::Connect => session.connect().await?,
        Input::Disconnect => session.disconnect().await?,
        Input::Events => {
            for event in session.events().await? {
                println!("{}", chat::render_event(&event));
            }
        }
        Input::Messages => {
            for message in session.messages().await? {
                println!("{}", chat::render_message(&message));
            }
        }
        Input::ClearMessages => session.clear_messages().await?,
        Input::ClearEvents => session.clear_events().await?,
        Input::Save => {
            let current = session.configuration().await?;
            match store.save(&current) {
                Ok(()) => println!("Settings saved to {}", store.path().display()),
                Err(e) => error!("Failed to save settings: {e}"),
            }
        }
        Input::Help => println!("{}", chat::HELP),
        Input::Quit => return Ok(false),
        Input::Empty => {}
        Input::Unknown(line) => println!("Unknown command: {line} (try /help)"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config();
    let mut logger_manager = LoggerManager::new(cfg.logger.clone()).unwrap_or_else(|e| {
        print_error!("Failed to setup Log Manager: {}", e);
        process::exit(1);
    });
    logger_manager.init().unwrap_or_else(|e| {
        print_error!("Failed to init Log Manager: {}", e);
        process::exit(1);
    });
    info!("Starting mqttchat version {}...", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", cfg.logger.level);

    let store = ConfigStore::new(&cfg.storage.settings_path);
    let settings = match store.load() {
        Ok(Some(saved)) => saved,
        Ok(None) => cfg.session.clone(),
        Err(e) => {
            warn!("Ignoring saved settings: {e}");
            cfg.session.clone()
        }
    };
    debug!("{:#?}", settings);

    let (_always_online, reachability) = if cfg.reachability.enabled {
        let monitor = ProbeMonitor::new(&cfg.reachability);
        let rx = monitor.subscribe();
        monitor.spawn();
        info!("Reachability probe: {}", cfg.reachability.probe_address);
        (None, rx)
    } else {
        let (tx, rx) = always_online();
        (Some(tx), rx)
    };

    let session = Session::builder(Arc::new(RumqttcConnector::new()))
        .configuration(settings.clone())
        .reachability(reachability)
        .spawn();
    tokio::spawn(print_updates(session.clone()));

    println!(
        "Chatting on {} at {}:{} as {} (MQTT {}). Type /help for commands.",
        settings.topic,
        settings.host,
        settings.port,
        settings.sender_label(),
        settings.version
    );
    session.connect().await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_input(&session, &store, Input::parse(&line)).await? {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("stdin closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {e}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, disconnecting...");
                break;
            }
        }
    }

    session.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
