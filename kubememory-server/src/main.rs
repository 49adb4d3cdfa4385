// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! KubeMemory CLI
//!
//! Feeds incidents, fixes and deployments into the memory, and queries it
//! through analysis, chat, tools and an MCP stdio server.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use kubememory_core::{IncidentId, IncidentStatus, NewFix, NewIncident};
use kubememory_server::{
    build_app,
    chat::ChatEvent,
    config::ServerConfig,
    init_tracing,
    llm::{InferenceClient, OllamaClient},
    mcp::{McpServer, StdioTransport},
    App,
};
use serde::Serialize;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "kubememory")]
#[command(author, version, about = "KubeMemory - incident memory for Kubernetes clusters", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true, env = "KUBEMEMORY_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory path (overrides config file)
    #[arg(long, global = true, env = "KUBEMEMORY_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest watcher incidents from a JSON file (one object or an array)
    Ingest {
        file: PathBuf,

        /// Store without running the analysis pipeline
        #[arg(long)]
        no_analyze: bool,
    },

    /// Record a remediation attempt for an incident
    Fix {
        incident_id: IncidentId,

        #[arg(short, long)]
        description: String,

        #[arg(long, default_value = "engineer")]
        applied_by: String,

        /// The fix resolved the incident
        #[arg(long)]
        worked: bool,

        /// The fix came from an AI recommendation
        #[arg(long)]
        ai_suggested: bool,

        /// Earlier fix this one corrects
        #[arg(long)]
        correction_of: Option<u64>,
    },

    /// Record a service deployment
    Deploy {
        service: String,

        #[arg(short, long)]
        namespace: String,

        #[arg(long)]
        version: String,

        /// Deployment time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Set an incident's status (open, investigating, resolved)
    Status {
        incident_id: IncidentId,
        status: String,
    },

    /// Analyse a stored incident, or a pod described on the command line
    Analyze {
        /// Stored incident to analyse
        #[arg(long, conflicts_with = "pod")]
        incident: Option<IncidentId>,

        #[arg(long, requires = "namespace")]
        pod: Option<String>,

        #[arg(short, long)]
        namespace: Option<String>,

        #[arg(long = "type")]
        incident_type: Option<String>,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        logs: String,

        /// Also generate a markdown runbook
        #[arg(long)]
        runbook: bool,
    },

    /// Show cluster patterns
    Patterns {
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Dump the causal graph of a namespace
    Snapshot {
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Interactive chat over stdin
    Chat {
        /// Scope the session to one namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Tool registry commands
    Tools {
        #[command(subcommand)]
        command: ToolCommands,
    },

    /// Serve the tools over MCP on stdio
    Mcp {
        /// Namespace injected into calls that carry none
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// List the models the inference endpoint serves
    Models,

    /// Wipe the causal graph and the vector collection
    Reset {
        /// Confirm the destructive reset
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum ToolCommands {
    /// List tools with their argument schemas
    List,

    /// Execute one tool
    Call {
        name: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        #[arg(short, long)]
        namespace: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.log_format.as_str() {
        "text" => init_tracing(false),
        "json" => init_tracing(true),
        other => bail!("Unknown log format: {} (expected text or json)", other),
    }

    let mut config = ServerConfig::load(cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    // Model listing needs no stores
    if let Commands::Models = cli.command {
        let client = OllamaClient::new(config.ollama.base_url.clone());
        let models = client
            .list_models(config.timeouts.model_list())
            .await
            .context("Failed to list models")?;
        for model in models {
            println!("{}", model);
        }
        return Ok(());
    }

    let app = build_app(&config).await.context("Failed to start KubeMemory")?;

    match cli.command {
        Commands::Models => unreachable!(), // Handled above
        Commands::Ingest { file, no_analyze } => {
            for new in read_incidents(&file)? {
                let outcome = app.memory.ingest(new, !no_analyze).await?;
                print_json(&outcome)?;
            }
        }

        Commands::Fix {
            incident_id,
            description,
            applied_by,
            worked,
            ai_suggested,
            correction_of,
        } => {
            let outcome = app
                .memory
                .submit_fix(NewFix {
                    incident_id,
                    description,
                    applied_by,
                    worked,
                    ai_suggested,
                    correction_of,
                })
                .await?;
            print_json(&outcome)?;
        }

        Commands::Deploy {
            service,
            namespace,
            version,
            at,
        } => {
            let deployed_at = at.unwrap_or_else(Utc::now);
            let node = app
                .memory
                .record_deployment(&service, &namespace, &version, deployed_at)
                .await?;
            println!("✓ Recorded {} {} in {} ({})", service, version, namespace, node);
        }

        Commands::Status { incident_id, status } => {
            let incident = app
                .memory
                .set_status(incident_id, parse_status(&status)?)
                .await?;
            println!("✓ Incident {} is {}", incident.id, incident.status);
        }

        Commands::Analyze {
            incident,
            pod,
            namespace,
            incident_type,
            description,
            logs,
            runbook,
        } => {
            let state = match (incident, pod, namespace) {
                (Some(id), _, _) => app.memory.analyze(id).await?,
                (None, Some(pod), Some(namespace)) => {
                    app.pipeline
                        .analyze_in_memory(
                            &pod,
                            &namespace,
                            incident_type.as_deref(),
                            &description,
                            &logs,
                        )
                        .await
                }
                _ => bail!("Pass --incident <id>, or --pod with --namespace"),
            };
            print_json(&state)?;
            if runbook {
                let runbook = app.runbooks.generate(&state).await;
                println!("\n{}", runbook.markdown);
            }
        }

        Commands::Patterns { namespace } => {
            let patterns = app
                .incidents
                .patterns(namespace.as_deref())
                .await
                .context("Failed to load patterns")?;
            print_json(&patterns)?;
        }

        Commands::Snapshot { namespace } => {
            let snapshot = app.graph.namespace_snapshot(namespace.as_deref()).await?;
            print_json(&snapshot)?;
        }

        Commands::Chat { namespace } => run_chat(&app, namespace).await?,

        Commands::Tools { command } => match command {
            ToolCommands::List => print_json(&app.tools.specs())?,
            ToolCommands::Call {
                name,
                args,
                namespace,
            } => {
                let arguments: Value =
                    serde_json::from_str(&args).context("--args must be a JSON object")?;
                let outcome = app
                    .tools
                    .execute(&name, arguments, namespace.as_deref())
                    .await;
                println!("{}", outcome.output);
                if !outcome.success {
                    std::process::exit(1);
                }
            }
        },

        Commands::Reset { yes } => {
            if !yes {
                bail!("Reset deletes every graph node and stored embedding; pass --yes to confirm");
            }
            app.graph.clear_all().await.context("Failed to clear graph")?;
            app.search.clear_all().await.context("Failed to clear vector store")?;
            println!("✓ Graph and vector memory cleared");
        }

        Commands::Mcp { namespace } => {
            let server = McpServer::new(app.tools.clone(), namespace);
            server
                .serve(&mut StdioTransport::stdio())
                .await
                .context("MCP transport failed")?;
        }
    }

    Ok(())
}

fn read_incidents(path: &Path) -> Result<Vec<NewIncident>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    let value: Value = serde_json::from_str(&content).context("Invalid JSON")?;
    let incidents = match value {
        Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<NewIncident>, _>>()?,
        other => vec![serde_json::from_value(other)?],
    };
    Ok(incidents)
}

fn parse_status(s: &str) -> Result<IncidentStatus> {
    match s.to_lowercase().as_str() {
        "open" => Ok(IncidentStatus::Open),
        "investigating" => Ok(IncidentStatus::Investigating),
        "resolved" => Ok(IncidentStatus::Resolved),
        _ => bail!("Unknown status: {} (expected open, investigating or resolved)", s),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_chat(app: &App, namespace: Option<String>) -> Result<()> {
    let mut session = app.chat.create_session(namespace.clone()).await?;
    eprintln!(
        "Chat session {} ({}). /sessions, /clear, Ctrl-D to quit.",
        session.id, session.namespace
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("> ");
        std::io::stderr().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match line.trim() {
            "" => continue,
            "/sessions" => {
                for s in app.chat.sessions().await? {
                    let mark = if s.id == session.id { "*" } else { " " };
                    eprintln!("{} {} [{}] {}", mark, s.id, s.namespace, s.title);
                }
                continue;
            }
            "/clear" => {
                app.chat.delete_session(session.id).await?;
                session = app.chat.create_session(namespace.clone()).await?;
                eprintln!("Chat session {} ({})", session.id, session.namespace);
                continue;
            }
            _ => {}
        }

        let (tx, mut rx) = mpsc::channel(64);
        let send = app.chat.send(session.id, &line, tx);
        let render = async {
            while let Some(event) = rx.recv().await {
                render_event(&event);
            }
        };
        let (outcome, ()) = tokio::join!(send, render);
        if let Err(e) = outcome {
            eprintln!("✗ {}", e);
        }
    }
    Ok(())
}

fn render_event(event: &ChatEvent) {
    match event {
        ChatEvent::TokenDelta { content } => {
            print!("{}", content);
            let _ = std::io::stdout().flush();
        }
        ChatEvent::ToolInvoked { name, arguments } => {
            eprintln!("  → {} {}", name, arguments);
        }
        ChatEvent::ToolResult {
            name,
            success,
            latency_ms,
            ..
        } => {
            let mark = if *success { "✓" } else { "✗" };
            eprintln!("  {} {} ({}ms)", mark, name, latency_ms);
        }
        ChatEvent::Done {
            tools_used,
            latency_ms,
            ..
        } => {
            println!();
            if !tools_used.is_empty() {
                eprintln!("  [{}] {}ms", tools_used.join(", "), latency_ms);
            }
        }
        ChatEvent::Error { message } => eprintln!("✗ {}", message),
    }
}
