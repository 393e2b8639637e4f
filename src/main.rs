use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};

use kpm_manager::error::MessageCategory;
use kpm_manager::kpm::manager::ManagerEvent;
use kpm_manager::{
    spawn_refresh_loop, CliModuleBridge, InstallMode, LogCollector, ManagerConfig, ModuleManager,
    ModuleSnapshot, PrivilegedExecutor, SettingsManager, StagedInstall, SuExecutor, VERSION,
};

/// Manage kernel-patch modules on a rooted device.
#[derive(Parser, Debug, PartialEq, Eq)]
#[command(name = "kpm_manager", version, about, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Show loaded modules, optionally filtered.
    #[command(alias = "ls")]
    List {
        /// Matched against id, name, author and description.
        query: Vec<String>,
    },

    /// Install a .kpm module.
    Install {
        file: PathBuf,

        /// `load` or `embed`; prompts when omitted.
        mode: Option<InstallMode>,
    },

    /// Unload a module and remove its persisted copy.
    #[command(alias = "rm")]
    Uninstall {
        id: String,

        /// Skip the confirmation prompt.
        #[arg(short = 'y', long = "yes")]
        assume_yes: bool,
    },

    /// Send control arguments to a module.
    Control {
        id: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Show one module's details.
    Info { id: String },

    /// Refresh periodically and print the module list.
    Watch,

    /// Show manager and KPM versions.
    Version,
}

/// Read one line from stdin without blocking the runtime.
async fn prompt_line(prompt: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || -> io::Result<String> {
        print!("{}", prompt);
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(line.trim().to_string())
    })
    .await
    .context("Prompt worker failed")?
    .context("Failed to read from stdin")
}

async fn confirm(prompt: String) -> bool {
    match prompt_line(prompt).await {
        Ok(answer) => matches!(answer.to_lowercase().as_str(), "y" | "yes"),
        Err(e) => {
            log::warn!("[Main] Confirmation prompt failed, declining: {}", e);
            false
        }
    }
}

fn render(snapshot: &ModuleSnapshot, query: Option<&str>) {
    let modules = snapshot.search(query.unwrap_or(""));
    if modules.is_empty() {
        println!("No modules loaded");
        return;
    }

    for module in modules {
        let action = if module.has_action { "  [control]" } else { "" };
        println!("{}  {}{}", module.id, module.display_name(), action);
        if !module.author.is_empty() {
            println!("    by {}", module.author);
        }
        if !module.description.is_empty() {
            println!("    {}", module.description);
        }
    }
}

/// Refresh, printing the short failure message instead of details.
async fn refresh_or_bail(manager: &ModuleManager) -> anyhow::Result<ModuleSnapshot> {
    manager
        .refresh()
        .await
        .map_err(|e| anyhow!(e.user_message()))
}

async fn run(
    command: Command,
    manager: &ModuleManager,
    config: &ManagerConfig,
    mut events: mpsc::Receiver<ManagerEvent>,
) -> anyhow::Result<()> {
    match command {
        Command::List { query } => {
            let snapshot = refresh_or_bail(manager).await?;
            let query = query.join(" ");
            render(&snapshot, Some(query.as_str()).filter(|q| !q.trim().is_empty()));
        }

        Command::Install { file, mode } => {
            let staging_dir = config.staging_dir.clone();
            let staged = tokio::task::spawn_blocking(move || {
                StagedInstall::stage_from_path(&staging_dir, &file)
            })
            .await
            .context("Staging worker failed")?
            .map_err(|e| {
                log::warn!("[Main] Staging failed: {}", e);
                anyhow!(e.user_message())
            })?;

            let mode = match mode {
                Some(mode) => mode,
                None => {
                    let answer = prompt_line("Install mode [load/embed] (load): ".to_string()).await?;
                    if answer.is_empty() {
                        InstallMode::Load
                    } else {
                        answer.parse::<InstallMode>().map_err(|e| anyhow!(e))?
                    }
                }
            };

            let outcome = manager
                .install(staged, mode)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("{}: {}", MessageCategory::InstallSucceeded.message(), outcome.id);
            if outcome.persistence_warning.is_some() {
                println!("Warning: the module copy was not persisted and will not survive a reboot");
            }
        }

        Command::Uninstall { id, assume_yes } => {
            refresh_or_bail(manager).await?;
            let outcome = manager
                .uninstall(&id, |token| {
                    let prompt = format!("Uninstall module '{}'? [y/N]: ", token.id());
                    async move { assume_yes || confirm(prompt).await }
                })
                .await
                .map_err(|e| anyhow!(e.user_message()))?;

            match outcome {
                Some(outcome) => {
                    println!("{}: {}", MessageCategory::UninstallSucceeded.message(), outcome.id);
                    if outcome.deletion_error.is_some() {
                        println!("Warning: the persisted module copy could not be deleted");
                    }
                }
                None => println!("Uninstall cancelled"),
            }
        }

        Command::Control { id, args } => {
            let args = args.join(" ");
            let status = manager
                .invoke_control(&id, &args)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            if status.is_success() {
                println!("{}", MessageCategory::ControlSucceeded.message());
            } else {
                bail!(
                    "{} (status {})",
                    MessageCategory::ControlFailed.message(),
                    status.code()
                );
            }
        }

        Command::Info { id } => {
            let module = manager
                .module_info(&id)
                .await
                .map_err(|e| anyhow!(e.user_message()))?;
            println!("id:          {}", module.id);
            println!("name:        {}", module.name);
            println!("version:     {}", module.version);
            println!("license:     {}", module.license);
            println!("author:      {}", module.author);
            println!("description: {}", module.description);
            println!("args:        {}", module.args);
            println!("control:     {}", if module.has_action { "yes" } else { "no" });
        }

        Command::Watch => {
            let (cancel_tx, cancel_rx) = watch::channel(false);
            let poller = spawn_refresh_loop(manager.clone(), config.refresh_interval(), cancel_rx);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Some(ManagerEvent::CacheRefreshed { .. }) => {
                            println!("--- {} ---", chrono::Local::now().format("%H:%M:%S"));
                            render(&manager.snapshot(), None);
                        }
                        Some(ManagerEvent::RefreshFailed(_)) => {
                            eprintln!("{}", MessageCategory::RefreshFailed.message());
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            let _ = cancel_tx.send(true);
            poller.await.context("Refresh loop failed")?;
        }

        Command::Version => {
            println!("kpm_manager {}", VERSION);
            match manager.kpm_version().await {
                Ok(version) => println!("KPM {}", version),
                Err(_) => println!("KPM not supported by the running kernel"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Cli { command } = Cli::parse();

    let (config, settings_warning) =
        SettingsManager::load_with_warning().context("Failed to load settings")?;
    config.validate().context("Invalid settings")?;

    // Logging comes up before anything that logs
    let collector = match LogCollector::new(&config.log_dir, config.log_level_filter()) {
        Ok(collector) => {
            if let Err(e) = collector.install_global() {
                eprintln!("[Main] WARNING: {}", e);
            }
            Some(collector)
        }
        Err(e) => {
            eprintln!("[Main] WARNING: LogCollector initialization failed: {}", e);
            None
        }
    };
    if let Some(warning) = settings_warning {
        log::warn!("{}", warning);
        if collector.is_none() {
            eprintln!("{}", warning);
        }
    }
    kpm_manager::log_info!("[Main] KPM Manager {} starting: {:?}", VERSION, command);

    let executor: Arc<dyn PrivilegedExecutor> = Arc::new(SuExecutor::new(
        config.su_binary.clone(),
        config.command_timeout(),
    ));
    let bridge = Arc::new(CliModuleBridge::new(
        executor.clone(),
        config.daemon_binary.clone(),
    ));
    let (events_tx, events_rx) = mpsc::channel::<ManagerEvent>(64);
    let manager = ModuleManager::with_events(executor, bridge, config.module_dir.clone(), events_tx);

    let result = run(command, &manager, &config, events_rx).await;
    if let Err(e) = &result {
        log::warn!("[Main] Command failed: {}", e);
    }

    if let Some(collector) = collector {
        if let Err(e) = collector.wait_for_empty().await {
            eprintln!("[Main] WARNING: {}", e);
        }
    }
    result
}
