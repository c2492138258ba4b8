//! Line-oriented front end: one session, one turn per stdin line.
//!
//! Usage: `contextkeeper [config.yaml]`. Without an argument the config is
//! located via `CONTEXTKEEPER_CONFIG` or an upward search for
//! `contextkeeper.yaml`.
//!
//! Lines starting with `/` are commands: `/clear`, `/history`, `/size`,
//! `/exit`. Ctrl-C cancels the turn in progress.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use contextkeeper::agent_core::{AgentError, HttpToolExecutor, Sampling, Session};
use contextkeeper::inference::config::{find_config_path, load_config};
use contextkeeper::inference::InferenceClient;

#[tokio::main]
async fn main() -> Result<()> {
    match contextkeeper::init_tracing() {
        Ok(path) => eprintln!("logging to {}", path.display()),
        Err(e) => eprintln!("logging disabled: {e}"),
    }

    let config_path = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => {
            let cwd = std::env::current_dir().context("cannot read working directory")?;
            find_config_path(&cwd)?
        }
    };
    let config = load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let sampling = Sampling::from(&config.endpoint);
    let client = InferenceClient::from_config(config.endpoint.clone())?;
    let model = client.model().to_string();
    let executor = HttpToolExecutor::new(config.tools.clone());
    let mut session = Session::new(
        Arc::new(client),
        Arc::new(executor),
        config.session.clone(),
        sampling,
    )?;

    eprintln!(
        "session {} ({}, {} family), config {}",
        session.id(),
        model,
        session.family(),
        config_path.display()
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match line {
            "/exit" | "/quit" => break,
            "/clear" => {
                session.clear();
                continue;
            }
            "/history" => {
                let json = session.export_history_json()?;
                stdout.write_all(json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                continue;
            }
            "/size" => {
                let msg = format!(
                    "{} messages, {} chars\n",
                    session.history().len(),
                    session.context_size()
                );
                stdout.write_all(msg.as_bytes()).await?;
                continue;
            }
            _ => {}
        }

        let token = session.cancel_token();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
        let result = session.run_turn(line).await;
        watcher.abort();

        match result {
            Ok(outcome) => {
                stdout.write_all(outcome.content.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                if let Some(err) = &outcome.error {
                    eprintln!("{}", err.diagnostic);
                }
            }
            Err(AgentError::Cancelled) => {
                eprintln!("(cancelled)");
                session.reset_cancellation();
            }
            Err(e) => return Err(e.into()),
        }
        stdout.flush().await?;
    }

    Ok(())
}
