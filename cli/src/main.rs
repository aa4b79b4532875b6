//! Weft binary.
//!
//! Subcommands:
//! - `serve --host H --port P` — start the core over the local adapter set.
//! - `run-playbook --workspace ID --code CODE [--inputs JSON]` — run one
//!   playbook synchronously. Exit codes: 0 `completed`, 2 `failed`,
//!   3 `cancelled`, 4 `cost_cap_exceeded`.

mod logging;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use weft::{
    build_engine, CoreConfig, Engine, EventFilter, IdentityPort, LocalIdentity,
    PlaybookExecutorPort, RemoteToolsConfig, RuntimeDefaults, SessionStatus,
};

const EXIT_COMPLETED: i32 = 0;
const EXIT_FAILED: i32 = 2;
const EXIT_CANCELLED: i32 = 3;
const EXIT_COST_CAP: i32 = 4;

#[derive(Parser, Debug)]
#[command(name = "weft")]
#[command(about = "Weft — local-first AI-workspace orchestration engine")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Verbose: debug-level engine logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server over the local adapter set
    Serve {
        /// Bind host (env HOST)
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,
        /// Bind port (env PORT)
        #[arg(long, env = "PORT", default_value_t = 8787)]
        port: u16,
    },
    /// Run one playbook synchronously and exit with its outcome
    RunPlaybook {
        /// Workspace id (created if missing)
        #[arg(long, value_name = "ID")]
        workspace: String,
        /// Playbook code
        #[arg(long, value_name = "CODE")]
        code: String,
        /// Session inputs as a JSON object
        #[arg(long, value_name = "JSON")]
        inputs: Option<String>,
    },
}

fn engine_from_env() -> Result<Engine, Box<dyn std::error::Error>> {
    let settings = config::Settings::from_env();
    let core = CoreConfig {
        db_path: Some(settings.database_path.clone()),
        sandbox_base: settings.sandbox_base.clone(),
        playbooks_dir: settings.playbooks_dir.clone(),
        openai_api_key: settings.openai_api_key.clone(),
        anthropic_api_key: settings.anthropic_api_key.clone(),
        remote_tools: settings.remote_tools().map(|(base_url, api_token)| {
            RemoteToolsConfig {
                base_url,
                api_token,
            }
        }),
        defaults: RuntimeDefaults::default(),
    };
    Ok(build_engine(core)?)
}

async fn run_playbook(
    engine: Engine,
    workspace: &str,
    code: &str,
    inputs: Option<&str>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let inputs = match inputs {
        Some(raw) => serde_json::from_str(raw)?,
        None => serde_json::json!({}),
    };
    engine.ensure_workspace(workspace, workspace).await?;
    let identity = LocalIdentity;
    let ctx = identity.resolve("", workspace).await?;

    let execution_id = engine.executor().start(&ctx, code, None, inputs).await?;
    let session = engine.executor().wait(&execution_id).await?;

    let code = match session.status {
        SessionStatus::Completed => EXIT_COMPLETED,
        SessionStatus::Cancelled => EXIT_CANCELLED,
        SessionStatus::Paused => {
            eprintln!("session paused: {:?}", session.paused_reason);
            EXIT_FAILED
        }
        SessionStatus::Failed => {
            // cost_cap_exceeded gets its own exit code; read it off the log.
            let errors = engine
                .events()
                .range(
                    workspace,
                    EventFilter {
                        session_id: Some(execution_id.clone()),
                        kind: Some("session_error".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            let cost_capped = errors
                .iter()
                .any(|e| e.payload["code"] == "cost_cap_exceeded");
            if let Some(last) = errors.last() {
                eprintln!(
                    "session failed: {} ({})",
                    last.payload["message"].as_str().unwrap_or("unknown"),
                    last.payload["code"].as_str().unwrap_or("unknown"),
                );
            }
            if cost_capped {
                EXIT_COST_CAP
            } else {
                EXIT_FAILED
            }
        }
        other => {
            eprintln!("session ended in unexpected state {}", other.as_str());
            EXIT_FAILED
        }
    };
    println!("{execution_id}");
    Ok(code)
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);
    if let Err(e) = config::load_and_apply(config::APP_NAME, None) {
        eprintln!("config load failed: {e}");
    }

    let exit = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            EXIT_FAILED
        }
    };
    std::process::exit(exit);
}

async fn run(args: Args) -> Result<i32, Box<dyn std::error::Error>> {
    match args.cmd {
        Command::Serve { host, port } => {
            let engine = engine_from_env()?;
            serve::serve(engine, Arc::new(LocalIdentity), &host, port).await?;
            Ok(EXIT_COMPLETED)
        }
        Command::RunPlaybook {
            workspace,
            code,
            inputs,
        } => {
            let engine = engine_from_env()?;
            run_playbook(engine, &workspace, &code, inputs.as_deref()).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_args_parse() {
        Args::command().debug_assert();
        let args = Args::parse_from([
            "weft",
            "run-playbook",
            "--workspace",
            "ws-1",
            "--code",
            "content_drafting",
            "--inputs",
            "{\"focus\":\"launch\"}",
        ]);
        match args.cmd {
            Command::RunPlaybook { workspace, code, inputs } => {
                assert_eq!(workspace, "ws-1");
                assert_eq!(code, "content_drafting");
                assert!(inputs.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn serve_defaults() {
        std::env::remove_var("HOST");
        std::env::remove_var("PORT");
        let args = Args::parse_from(["weft", "serve"]);
        match args.cmd {
            Command::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8787);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
