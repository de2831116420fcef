//! MichiMem Event Dispatcher
//!
//! A short-lived, single-threaded process invoked once per host lifecycle
//! event as `michimem-hook <event_name>`, with a single JSON payload on
//! standard input. Translates the event into calls against C1–C5 and exits.
//! No tokio: every call this process makes is synchronous.

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use michimem_core::{
    build_l0_context, build_restore_context, create_checkpoint, extract, get_latest_checkpoint,
    run_compounding, run_lifecycle, Config, Store,
};
use serde::Deserialize;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

/// The payload every hook event receives on stdin. Optional fields are
/// event-specific; absence of one is not itself an error.
#[derive(Debug, Deserialize)]
struct HookInput {
    session_id: String,
    transcript_path: PathBuf,
    #[allow(dead_code)]
    cwd: Option<String>,
    #[serde(default)]
    hook_event_name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    trigger: Option<String>,
    #[serde(default)]
    stop_hook_active: Option<bool>,
    #[serde(default)]
    reason: Option<String>,
}

/// The platform-default data directory. Mirrors the tool server's own
/// resolution; hook invocations never take a `--data-dir` flag.
fn data_dir() -> Result<PathBuf> {
    ProjectDirs::from("com", "michimem", "michimem")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("could not determine platform data directory")
}

fn handle_session_start(store: &Store, config: &Config, input: &HookInput) -> Result<()> {
    let mut context = build_l0_context(store, config).context("building L0 context")?;

    if input.source.as_deref() == Some("compact") {
        if let Some(checkpoint) = get_latest_checkpoint(store.data_dir(), &input.session_id) {
            let restore = build_restore_context(&checkpoint);
            if context.is_empty() {
                context = restore;
            } else {
                context.push_str("\n\n");
                context.push_str(&restore);
            }
        }
    }

    if !context.is_empty() {
        let output = serde_json::json!({
            "hookSpecificOutput": {
                "hookEventName": "SessionStart",
                "additionalContext": context,
            }
        });
        println!("{}", serde_json::to_string(&output)?);
    }

    Ok(())
}

fn handle_pre_compact(store: &Store, input: &HookInput) -> Result<()> {
    let checkpoint = create_checkpoint(store.data_dir(), &input.session_id, &input.transcript_path)
        .context("creating checkpoint")?;
    store.record_metric(
        "precompact",
        &serde_json::json!({
            "session_id": input.session_id,
            "trigger": input.trigger,
            "checkpoint_created": checkpoint.is_some(),
        }),
    );
    Ok(())
}

fn handle_stop(store: &Store, config: &Config, input: &HookInput) -> Result<()> {
    if input.stop_hook_active.unwrap_or(false) {
        info!("stop_hook_active, skipping extraction");
        return Ok(());
    }

    let extraction = extract(&input.transcript_path, config);
    let mut diaries_inserted = 0;
    let mut candidates_inserted = 0;

    if let Some(diary) = extraction.diary {
        store.insert(diary).context("inserting diary")?;
        diaries_inserted += 1;
    }

    for candidate in extraction.corrections.into_iter().chain(extraction.preferences) {
        let memory_type = candidate.memory_type.unwrap_or(michimem_core::MemoryType::Knowledge);
        let exists = store
            .get_by_type(memory_type, 10_000)
            .context("checking for existing correction/preference")?
            .iter()
            .any(|existing| existing.title.eq_ignore_ascii_case(&candidate.title));
        if !exists {
            store.insert(candidate).context("inserting correction/preference")?;
            candidates_inserted += 1;
        }
    }

    store.record_metric(
        "stop_extract",
        &serde_json::json!({
            "session_id": input.session_id,
            "diaries_inserted": diaries_inserted,
            "candidates_inserted": candidates_inserted,
        }),
    );

    Ok(())
}

fn handle_session_end(store: &Store, config: &Config, input: &HookInput) -> Result<()> {
    let compounding = run_compounding(store, config).context("running compounding")?;
    let lifecycle = run_lifecycle(store, config).context("running lifecycle")?;
    store.record_metric(
        "session_end",
        &serde_json::json!({
            "session_id": input.session_id,
            "reason": input.reason,
            "insights_created": compounding.insights_created,
            "knowledge_created": compounding.knowledge_created,
            "expired": lifecycle.expired,
            "archived": lifecycle.archived,
        }),
    );
    Ok(())
}

fn run(event_name: &str) -> Result<()> {
    let mut payload = String::new();
    io::stdin()
        .read_to_string(&mut payload)
        .context("reading stdin")?;

    let input: HookInput = serde_json::from_str(&payload).context("parsing hook payload")?;

    let data_dir = data_dir()?;
    let store = Store::open(&data_dir).context("opening store")?;
    let config = Config::load(&data_dir);

    match event_name {
        "SessionStart" => handle_session_start(&store, &config, &input)?,
        "PreCompact" => handle_pre_compact(&store, &input)?,
        "Stop" => handle_stop(&store, &config, &input)?,
        "SessionEnd" => handle_session_end(&store, &config, &input)?,
        other => {
            warn!(event = other, "unrecognized event, ignoring");
        }
    }

    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::WARN.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    let event_name = match std::env::args().nth(1) {
        Some(name) => name,
        None => {
            eprintln!("error: missing event name");
            eprintln!("Usage: michimem-hook <event_name>");
            std::process::exit(1);
        }
    };

    if let Err(err) = run(&event_name) {
        eprintln!("michimem-hook: {err:#}");
        std::process::exit(1);
    }
}
