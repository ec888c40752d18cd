mod command;
mod config;
mod session;

use std::{env, io, path::PathBuf, process, sync::Arc};

use enrollment_engine::EnrollmentEngine;
use ledger::{InMemoryCatalog, SnapshotError};
use log::{info, warn};
use serde_json::Value;
use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
    task::JoinHandle,
};

use crate::{
    command::Command,
    config::{AppConfig, ConfigError},
    session::Session,
};

fn main() {
    if let Err(err) = run() {
        eprintln!("enroll failed: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), AppError> {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let config = AppConfig::load(parse_config_path()?.as_deref())?;
    let (catalog, frozen) = InMemoryCatalog::bootstrap(&config.ledger)?;
    let engine = EnrollmentEngine::new(catalog.store(), config.engine.clone());
    if frozen {
        engine.set_frozen(true);
    }
    info!(
        "[enroll] state at {:?}; waitlist default {}, per-student waitlist limit {}, frozen={}",
        config.ledger.state_dir(),
        config.settings.engine.default_waitlist_maximum,
        config.settings.engine.max_waitlisted_classes,
        engine.is_frozen()
    );
    let session = Arc::new(Session::new(engine, catalog, config.ledger.clone()));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(Arc::clone(&session)))?;

    session.persist()?;
    info!("[enroll] snapshot saved to {:?}", config.ledger.snapshot_path());
    Ok(())
}

fn parse_config_path() -> Result<Option<PathBuf>, AppError> {
    let mut args = env::args().skip(1);
    let path = args.next().map(PathBuf::from);
    if args.next().is_some() {
        return Err(AppError::Usage);
    }
    Ok(path)
}

/// Reads requests until stdin closes. Student requests run concurrently, one
/// task each; barrier commands wait for the in-flight ones first.
async fn serve(session: Arc<Session>) -> Result<(), AppError> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(reply) = rx.recv().await {
            let mut line = reply.to_string();
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), io::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    let mut seq = 0u64;
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(_) => {
                seq += 1;
                if let Some(reply) = session.handle_line(seq, &line) {
                    let _ = tx.send(reply);
                }
                continue;
            }
        };
        seq += 1;
        if command.is_barrier() {
            drain(&mut in_flight).await;
            let session = Arc::clone(&session);
            let reply =
                tokio::task::spawn_blocking(move || session.reply(seq, &command)).await?;
            let _ = tx.send(reply);
            continue;
        }
        let session = Arc::clone(&session);
        let tx = tx.clone();
        in_flight.push(tokio::task::spawn_blocking(move || {
            let _ = tx.send(session.reply(seq, &command));
        }));
    }
    drain(&mut in_flight).await;
    drop(tx);
    writer.await??;
    Ok(())
}

async fn drain(in_flight: &mut Vec<JoinHandle<()>>) {
    for handle in in_flight.drain(..) {
        if let Err(err) = handle.await {
            warn!("[enroll] request task failed: {err}");
        }
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error("usage: enroll [config.toml]")]
    Usage,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("request task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
