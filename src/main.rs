//! CoolSafe console runner
//!
//! Wires configuration, the local database, directories, backend sync, the
//! status monitor and the voice orchestrator. Typed lines stand in for speech.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use coolsafe::clock::SystemClock;
use coolsafe::config::{get_config_path, load_config};
use coolsafe::cooling::{SessionManager, StatusMonitor};
use coolsafe::database::{default_database_path, Database};
use coolsafe::directory::{get_presets_path, get_staff_path, InMemoryPresetCatalog, InMemoryStaffDirectory};
use coolsafe::speech::console::{ConsoleCapture, ConsoleSynthesizer};
use coolsafe::speech::speech_channel;
use coolsafe::sync::{spawn_sync_task, HttpBackend, MemoryBackend, Syncer};
use coolsafe::voice::{
    spawn_voice, VoiceDevices, VoiceDirectories, VoiceNotice, VoiceSettings,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    coolsafe::init_logging();
    tracing::info!("CoolSafe starting");

    let config_path = get_config_path();
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    let db_path = config
        .general
        .database_path
        .clone()
        .unwrap_or_else(default_database_path);
    let db = Arc::new(
        Database::open(&db_path)
            .with_context(|| format!("Failed to open database at {:?}", db_path))?,
    );

    let staff_path = config.general.staff_path.clone().unwrap_or_else(get_staff_path);
    let staff = Arc::new(InMemoryStaffDirectory::load(&staff_path)?);
    let presets_path = config
        .general
        .presets_path
        .clone()
        .unwrap_or_else(get_presets_path);
    let presets = Arc::new(InMemoryPresetCatalog::load(&presets_path)?);

    let flush_interval = Duration::from_secs(config.sync.flush_interval_secs);
    let (sync, sync_task) = match HttpBackend::from_config(&config.sync)? {
        Some(backend) => {
            tracing::info!("Syncing to {}", backend.base_url());
            spawn_sync_task(Arc::new(Syncer::new(db.clone(), backend)), flush_interval)
        }
        None => {
            tracing::info!("No backend configured; records stay queued locally");
            let backend = MemoryBackend::new(false);
            spawn_sync_task(Arc::new(Syncer::new(db.clone(), backend)), flush_interval)
        }
    };

    let manager = Arc::new(
        SessionManager::new(db.clone(), Arc::new(SystemClock), &config.cooling)
            .with_sync(sync.clone()),
    );

    let monitor = StatusMonitor::new(manager.clone(), config.cooling.status_tick());
    let alerts = monitor.subscribe();
    let monitor = monitor.spawn();

    let (sink, events) = speech_channel();
    let devices = VoiceDevices {
        capture: Box::new(ConsoleCapture::spawn(sink.clone())),
        synthesizer: Box::new(ConsoleSynthesizer::new(sink)),
        events,
    };
    let (voice, voice_task) = spawn_voice(
        VoiceSettings::from_config(&config),
        manager,
        VoiceDirectories { staff, presets },
        devices,
        Some(alerts),
    );

    let mut notices = voice.subscribe();
    tokio::spawn(async move {
        loop {
            match notices.recv().await {
                Ok(VoiceNotice::Spoke { .. }) => {}
                Ok(notice) => println!("[notice] {:?}", notice),
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    if config.voice.enabled {
        let phrase = config
            .voice
            .wake_phrases
            .first()
            .cloned()
            .unwrap_or_default();
        println!(
            "Type what you would say, e.g. \"{} start cooling rice\". Ctrl-C to quit.",
            phrase
        );
    } else {
        tracing::info!("Voice control is disabled in {:?}", config_path);
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Shutting down");

    voice.shutdown();
    let _ = voice_task.await;
    monitor.stop();
    sync.shutdown();
    let _ = sync_task.await;
    Ok(())
}
