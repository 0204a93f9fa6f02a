use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use civis_core::{Language, ResourceBinding, Settings};
use civis_formats::NormalizeOptions;
use civis_hub::{HttpTransport, ResourceFetcher};
use civis_persist::{BindingStore, SqliteStore, StoredBinding};
use civis_store::{BindingRegistry, Entity, PollingBinder};
use civis_wizard::{Form, Outcome, Step, Translations, UserInput, Wizard, WizardPolicy};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "civisctl", version, about = "Open-data catalog bridge")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Catalog API base URL
    #[arg(long = "base-url", global = true, env = "CIVIS_BASE_URL")]
    base_url: Option<String>,

    /// Catalog language (en, it, de, rm)
    #[arg(long = "lang", global = true, env = "CIVIS_LANG")]
    lang: Option<String>,

    /// Binding database path
    #[arg(long = "db", global = true, env = "CIVIS_DB_PATH")]
    db: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List catalog groups
    Groups,
    /// List datasets of a group
    Packages {
        /// Group id or name
        group: String,
    },
    /// List resources of a dataset
    Resources {
        /// Package id
        package: String,
    },
    /// Walk the selection wizard and store the resulting binding
    Add,
    /// List stored bindings
    List,
    /// Show a stored binding and its entities
    Show {
        id: String,
        /// Fetch fresh rows before printing
        #[arg(long = "refresh", action = ArgAction::SetTrue)]
        refresh: bool,
    },
    /// Delete a stored binding
    Remove { id: String },
    /// Poll every stored binding until Ctrl-C
    Run,
}

fn init_tracing() {
    let env = std::env::var("CIVIS_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CIVIS_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CIVIS_METRICS_ADDR; expected host:port");
        }
    }
}

fn settings(cli: &Cli) -> Result<Settings> {
    let mut s = Settings::from_env();
    if let Some(url) = &cli.base_url {
        s.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(code) = &cli.lang {
        s.language = Language::parse(code).ok_or_else(|| anyhow!("unsupported language {code:?}"))?;
    }
    if let Some(db) = &cli.db {
        s.db_path = Some(db.clone());
    }
    Ok(s)
}

fn open_store(s: &Settings) -> Result<SqliteStore> {
    match &s.db_path {
        Some(p) => SqliteStore::open(p),
        None => SqliteStore::open_default(),
    }
}

fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[derive(Serialize)]
struct BindingSummary<'a> {
    id: &'a str,
    title: &'a str,
    format: &'a str,
    entities: usize,
    saved_ts: i64,
}

fn summary(s: &StoredBinding) -> BindingSummary<'_> {
    BindingSummary {
        id: &s.id,
        title: &s.binding.title,
        format: s.binding.format.as_str(),
        entities: s.binding.entity_count(),
        saved_ts: s.saved_ts,
    }
}

fn print_entities(entities: &[Entity]) {
    for e in entities {
        let st = e.state();
        let value = st.value.as_ref().map(civis_core::render_value).unwrap_or_else(|| "unavailable".into());
        let value = if st.available { value } else { "unavailable".into() };
        match (st.latitude, st.longitude) {
            (Some(lat), Some(lon)) => println!("{:<48} {} ({lat:.5}, {lon:.5})", st.object_id, value),
            _ => println!("{:<48} {}", st.object_id, value),
        }
    }
}

/// Ask for the answer to one rendered step. `None` from a prompt means back.
fn prompt(form: &Form) -> Result<UserInput> {
    use dialoguer::{Confirm, MultiSelect, Select};

    if let Some(err) = &form.error {
        eprintln!("! {err}");
    }
    if let Some(desc) = &form.description {
        println!("{desc}");
    }
    let labels: Vec<&str> = form.options.iter().map(|c| c.label.as_str()).collect();
    let value = |i: usize| form.options[i].value.clone();

    match form.step {
        Step::Fields => {
            let picked = MultiSelect::new().with_prompt(&form.title).items(&labels).interact_opt()?;
            Ok(match picked {
                Some(ix) => UserInput::Fields(ix.into_iter().map(value).collect()),
                None => UserInput::Back,
            })
        }
        Step::Confirm => {
            for line in &form.preview {
                println!("  {line}");
            }
            let ok = Confirm::new().with_prompt(&form.title).default(true).interact_opt()?;
            Ok(if ok == Some(true) { UserInput::Confirm } else { UserInput::Back })
        }
        step => {
            if labels.is_empty() {
                return Ok(UserInput::Back);
            }
            let Some(i) = Select::new().with_prompt(&form.title).items(&labels).default(0).interact_opt()? else {
                return Ok(UserInput::Back);
            };
            let v = value(i);
            Ok(match step {
                Step::Language => UserInput::Language(Language::parse(&v).unwrap_or_default()),
                Step::Group => UserInput::Group(v),
                Step::Package => UserInput::Package(v),
                Step::Resource => UserInput::Resource(v),
                _ => UserInput::Row(v),
            })
        }
    }
}

async fn run_wizard(mut wizard: Wizard) -> Result<ResourceBinding> {
    let mut input = None;
    loop {
        match wizard.handle(input.take()).await {
            Outcome::Done(binding) => return Ok(binding),
            Outcome::Form(form) => {
                let form = tokio::task::spawn_blocking(move || prompt(&form).map(|i| (form.step, i)));
                let (step, answer) = form.await.context("prompt task")??;
                if step == Step::Language && answer == UserInput::Back {
                    return Err(anyhow!("wizard cancelled"));
                }
                input = Some(answer);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let settings = settings(&cli)?;
    let fetcher = ResourceFetcher::from_settings(&settings, Arc::new(HttpTransport::new())).with_language(settings.language);
    let translations = Arc::new(match &settings.translations_dir {
        Some(dir) => Translations::with_overrides(dir),
        None => Translations::embedded(),
    });

    match cli.command {
        Commands::Groups => {
            let groups = fetcher.group_list().await?;
            match cli.output {
                Output::Human => {
                    for g in &groups {
                        let label = translations.group_label(settings.language, &g.name).unwrap_or_else(|| g.display_name.clone());
                        println!("{:<40} {}", g.name, label);
                    }
                }
                Output::Json => print_json(&groups)?,
            }
        }
        Commands::Packages { group } => {
            let packages = fetcher.group_packages(&group).await?;
            match cli.output {
                Output::Human => {
                    for p in &packages {
                        println!("{:<38} {}", p.id, p.title);
                    }
                }
                Output::Json => print_json(&packages)?,
            }
        }
        Commands::Resources { package } => {
            let resources = fetcher.package_resources(&package).await?;
            match cli.output {
                Output::Human => {
                    for r in &resources {
                        let flag = if r.selectable() { "" } else { "  (not supported)" };
                        println!("{:<38} {:<6} {}{flag}", r.id, r.format_tag, civis_wizard::clean_resource_name(&r.name));
                    }
                }
                Output::Json => print_json(&resources)?,
            }
        }
        Commands::Add => {
            let store = open_store(&settings)?;
            let wizard = Wizard::new(fetcher, translations, WizardPolicy::from_settings(&settings))
                .with_normalize_options(NormalizeOptions::from_settings(&settings));
            let binding = run_wizard(wizard).await?;
            let id = store.save(&binding)?;
            info!(id = %id, title = %binding.title, "binding stored");
            match cli.output {
                Output::Human => println!("stored {id}: {} ({} entities)", binding.title, binding.entity_count()),
                Output::Json => print_json(&StoredBinding { id, saved_ts: binding.created_ts, binding })?,
            }
        }
        Commands::List => {
            let all = open_store(&settings)?.load_all()?;
            match cli.output {
                Output::Human => {
                    println!("ID                                    FORMAT  ENTITIES  TITLE");
                    for s in &all {
                        let row = summary(s);
                        println!("{:<37} {:<7} {:<9} {}", row.id, row.format, row.entities, row.title);
                    }
                }
                Output::Json => print_json(&all.iter().map(summary).collect::<Vec<_>>())?,
            }
        }
        Commands::Show { id, refresh } => {
            let stored = open_store(&settings)?.load(&id)?.ok_or_else(|| anyhow!("no binding with id {id}"))?;
            let binder = PollingBinder::new(stored.binding.clone(), fetcher, NormalizeOptions::from_settings(&settings));
            if refresh {
                let outcome = binder.refresh().await;
                info!(outcome = ?outcome, "refresh");
            }
            match cli.output {
                Output::Human => {
                    println!("{} [{}] {}", stored.binding.title, stored.binding.format, stored.binding.url);
                    print_entities(binder.entities());
                }
                Output::Json => {
                    #[derive(Serialize)]
                    struct Shown<'a> {
                        #[serde(flatten)]
                        stored: &'a StoredBinding,
                        entities: Vec<civis_store::EntityState>,
                    }
                    let entities = binder.entities().iter().map(Entity::state).collect();
                    print_json(&Shown { stored: &stored, entities })?;
                }
            }
        }
        Commands::Remove { id } => {
            if open_store(&settings)?.delete(&id)? {
                println!("removed {id}");
            } else {
                return Err(anyhow!("no binding with id {id}"));
            }
        }
        Commands::Run => {
            let all = open_store(&settings)?.load_all()?;
            if all.is_empty() {
                warn!("no stored bindings; nothing to poll");
                return Ok(());
            }
            let registry = BindingRegistry::new(fetcher, &settings);
            let mut watchers = Vec::with_capacity(all.len());
            for s in all {
                let binder = registry.activate(&s.id, s.binding);
                let mut epochs = binder.subscribe_epoch();
                let output = cli.output;
                watchers.push(tokio::spawn(async move {
                    while epochs.changed().await.is_ok() {
                        match output {
                            Output::Human => print_entities(binder.entities()),
                            Output::Json => {
                                let states: Vec<_> = binder.entities().iter().map(Entity::state).collect();
                                if let Ok(line) = serde_json::to_string(&states) {
                                    println!("{line}");
                                }
                            }
                        }
                    }
                }));
            }
            info!(bindings = registry.entry_ids().len(), "polling; Ctrl-C to stop");
            signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            info!("Ctrl-C received; shutting down");
            for w in watchers {
                w.abort();
            }
            for id in registry.entry_ids() {
                registry.deactivate(&id);
            }
        }
    }
    Ok(())
}
