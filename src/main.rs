use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use recovery_ops::classifier::Classifier;
use recovery_ops::config::{AppConfig, NotifyConfig};
use recovery_ops::event::{Event, EventKind};
use recovery_ops::monitor::{MailMonitor, spawn_mail_monitor};
use recovery_ops::notify::{Dispatcher, DispatcherConfig, FallbackStore, SmtpTransport, Transport};
use recovery_ops::smoke::{SmokeCheck, SmokeRunner};
use recovery_ops::todos::{TodoGenerator, TodoStatus, TodoStore};

/// Operational tooling for the recovery-support app
#[derive(Parser, Debug)]
#[command(name = "recovery-ops", version)]
struct Cli {
    /// Verbose logging (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a notification for an event (falls back to a file if delivery fails)
    Notify {
        /// Event kind, e.g. security-alert
        #[arg(short, long)]
        kind: String,
        /// Event payload as a JSON object
        #[arg(short, long, default_value = "{}")]
        payload: String,
    },
    /// Generate a TODO record from an event
    Todo {
        #[arg(short, long)]
        kind: String,
        #[arg(short, long, default_value = "{}")]
        payload: String,
        /// Also send a notification for the event
        #[arg(long)]
        notify: bool,
    },
    /// List TODO records
    Todos,
    /// Change a TODO record's status (open, in_progress, done)
    SetStatus { id: Uuid, status: String },
    /// Poll the bug-report inbox
    Monitor {
        /// Poll once and exit instead of running until Ctrl-C
        #[arg(long)]
        once: bool,
    },
    /// Run HTTP smoke checks
    Smoke {
        /// Overrides SMOKE_BASE_URL
        #[arg(long)]
        base_url: Option<String>,
        /// JSON file with an array of checks; built-in checks otherwise
        #[arg(long)]
        checks: Option<PathBuf>,
        /// Send a notification per failed check
        #[arg(long)]
        notify: bool,
        /// Create a TODO record per failed check
        #[arg(long)]
        todo: bool,
    },
    /// List notifications waiting in the fallback store
    Pending,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _ = dotenvy::dotenv();

    let filter = match cli.verbose {
        0 => "info",
        1 => "recovery_ops=debug,info",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let classifier = Arc::new(Classifier::default_rules());
    let app = App {
        dispatcher: build_dispatcher(&config.notify, Arc::clone(&classifier)),
        generator: TodoGenerator::new(Arc::clone(&classifier)),
        todos: TodoStore::new(&config.todo_dir),
        config,
    };

    // Errors surface only after queued notifications are delivered or on disk.
    app.dispatcher.settle(app.run(cli.command)).await
}

struct App {
    config: AppConfig,
    dispatcher: Dispatcher,
    generator: TodoGenerator,
    todos: TodoStore,
}

impl App {
    async fn run(&self, command: Command) -> anyhow::Result<()> {
        let Self {
            config,
            dispatcher,
            generator,
            todos,
        } = self;

        match command {
            Command::Notify { kind, payload } => {
                let event = parse_event(&kind, &payload)?;
                dispatcher.submit(event);
                dispatcher.wait_idle().await;
                print_json(&dispatcher.stats())?;
            }
            Command::Todo {
                kind,
                payload,
                notify,
            } => {
                let event = parse_event(&kind, &payload)?;
                let record = generator.from_event(&event);
                let path = todos.save(&record).await?;
                tracing::info!(id = %record.id, path = %path.display(), "TODO record created");
                if notify {
                    dispatcher.submit(event);
                }
                print_json(&record)?;
            }
            Command::Todos => {
                print_json(&todos.list().await?)?;
            }
            Command::SetStatus { id, status } => {
                let status: TodoStatus = status.parse().map_err(anyhow::Error::msg)?;
                print_json(&todos.set_status(id, status).await?)?;
            }
            Command::Monitor { once } => {
                let Some(monitor_config) = config.monitor.clone() else {
                    bail!("MONITOR_IMAP_HOST is not set");
                };
                let store = TodoStore::new(&monitor_config.report_dir);
                let monitor = Arc::new(MailMonitor::new(
                    monitor_config,
                    generator.clone(),
                    store,
                    Some(dispatcher.clone()),
                ));

                if once {
                    let report = monitor.poll_once().await?;
                    print_json(&report)?;
                } else {
                    let (handle, shutdown) = spawn_mail_monitor(Arc::clone(&monitor));
                    tokio::signal::ctrl_c().await?;
                    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
                    handle.abort();
                }
            }
            Command::Smoke {
                base_url,
                checks,
                notify,
                todo,
            } => {
                let Some(base_url) = base_url.or_else(|| config.smoke.base_url.clone()) else {
                    bail!("no base URL: pass --base-url or set SMOKE_BASE_URL");
                };
                let checks = match checks {
                    Some(path) => {
                        let raw = tokio::fs::read_to_string(&path)
                            .await
                            .with_context(|| format!("reading {}", path.display()))?;
                        serde_json::from_str::<Vec<SmokeCheck>>(&raw)
                            .with_context(|| format!("parsing {}", path.display()))?
                    }
                    None => SmokeCheck::defaults(),
                };

                let runner = SmokeRunner::new(&base_url, config.smoke.timeout)?;
                let results = runner.run(&checks).await;

                for event in results.iter().filter_map(|r| r.to_event()) {
                    if todo {
                        todos.save(&generator.from_event(&event)).await?;
                    }
                    if notify {
                        dispatcher.submit(event);
                    }
                }
                print_json(&results)?;

                let failed = results.iter().filter(|r| !r.passed).count();
                if failed > 0 {
                    bail!("{failed} of {} smoke checks failed", results.len());
                }
            }
            Command::Pending => {
                let store = FallbackStore::new(&config.notify.fallback_dir);
                for path in store.list().await? {
                    println!("{}", path.display());
                }
            }
        }

        Ok(())
    }
}

fn build_dispatcher(config: &NotifyConfig, classifier: Arc<Classifier>) -> Dispatcher {
    let transport: Option<Arc<dyn Transport>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(SmtpTransport::new(smtp.clone()))),
        None => {
            tracing::warn!(
                dir = %config.fallback_dir.display(),
                "NOTIFY_SMTP_HOST not set, notifications will be written to the fallback store"
            );
            None
        }
    };

    Dispatcher::new(
        transport,
        FallbackStore::new(&config.fallback_dir),
        classifier,
        DispatcherConfig {
            recipient: config.recipient.clone(),
            send_timeout: config.send_timeout,
        },
    )
}

fn parse_event(kind: &str, payload: &str) -> anyhow::Result<Event> {
    let kind: EventKind = kind.parse()?;
    let payload: serde_json::Value =
        serde_json::from_str(payload).context("payload is not valid JSON")?;
    Ok(Event::from_json(kind, payload)?)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
