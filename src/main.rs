use std::{error::Error, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use futures::executor::block_on;

use proxy_switch::{
    FileStorage, GlobalState, ProfileId, ProfileStore, ProxyActivation, ProxyError, QuickToggle,
    SettingsPage, Storage, SyncChannel,
    configuration::Configuration,
    profile::parse_bypass_text,
    system,
};

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "proxy-switch", version, about = "Switch between named proxy profiles")]
struct Cli {
    /// Configuration file (defaults to the user configuration directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the current profile and whether the proxy is applied
    Status,
    /// List all profiles
    List,
    /// Route traffic through the current profile
    On,
    /// Route traffic directly
    Off,
    /// Flip the proxy on or off
    Toggle,
    /// Make a profile current
    Use { id: String },
    /// Create a profile and make it current
    Add(ProfileArguments),
    /// Change an existing profile
    Edit {
        id: String,
        #[command(flatten)]
        fields: ProfileArguments,
    },
    /// Delete a profile
    Remove { id: String },
    /// Apply the configured cold-start policy
    Startup,
    /// Apply the cold-start policy, then follow state changes
    Watch,
}

#[derive(Args)]
struct ProfileArguments {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    port: Option<String>,
    /// Bypass pattern, repeatable; replaces the existing list
    #[arg(long = "bypass")]
    bypass: Vec<String>,
    /// File with one bypass pattern per line
    #[arg(long)]
    bypass_file: Option<PathBuf>,
}

impl ProfileArguments {
    /// Bypass text from `--bypass-file` and `--bypass`, or `None` when
    /// neither was given.
    fn bypass_text(&self) -> Result<Option<String>, String> {
        let mut lines = Vec::new();
        if let Some(path) = &self.bypass_file {
            let content = std::fs::read_to_string(path)
                .map_err(|error| format!("Failed to read {}: {error}", path.display()))?;
            lines.extend(parse_bypass_text(&content));
        }
        lines.extend(self.bypass.iter().cloned());
        if lines.is_empty() {
            Ok(None)
        } else {
            Ok(Some(lines.join("\n")))
        }
    }
}

struct Session {
    storage: Arc<FileStorage>,
    store: ProfileStore,
    configuration: Configuration,
}

impl Session {
    fn open(configuration_path: PathBuf) -> Self {
        let configuration = Configuration::load(&configuration_path);
        let storage = Arc::new(FileStorage::new(configuration.state_file_path()));
        let applier = system::applier_for(configuration.backend);
        let activation = ProxyActivation::new(storage.clone() as Arc<dyn Storage>, applier);
        Self {
            storage,
            store: ProfileStore::new(activation),
            configuration,
        }
    }

    fn channel(&self) -> Result<SyncChannel, ProxyError> {
        block_on(SyncChannel::open(self.storage.as_ref()))
    }
}

fn status_line(state: &GlobalState) -> String {
    let current = state.current_profile();
    format!(
        "{:<3}  {} ({})",
        if state.proxy_enabled() { "ON" } else { "OFF" },
        current.name,
        current.target_label()
    )
}

/// Status line followed by what the quick toggle reports, e.g. `[Error: ...]`.
fn toggle_line(toggle: &QuickToggle) -> Option<String> {
    toggle
        .state()
        .map(|state| format!("{}  [{}]", status_line(state), toggle.status().label()))
}

fn print_profiles(state: &GlobalState) {
    for profile in state.profiles() {
        let marker = if &profile.id == state.current_profile_id() {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:<16} {:<24} {}",
            profile.id,
            profile.name,
            profile.target_label()
        );
        if !profile.bypass_list.is_empty() {
            println!("    bypass: {}", profile.bypass_list.join(", "));
        }
    }
}

fn save_profile(
    page: &mut SettingsPage,
    arguments: &ProfileArguments,
) -> Result<ProfileId, Box<dyn Error>> {
    let bypass = arguments.bypass_text()?;
    let draft = page.draft_mut();
    if let Some(name) = &arguments.name {
        draft.name = name.clone();
    }
    if let Some(host) = &arguments.host {
        draft.host = host.clone();
    }
    if let Some(port) = &arguments.port {
        draft.port = port.clone();
    }
    if let Some(bypass) = bypass {
        draft.bypass_text = bypass;
    }
    Ok(block_on(page.save())?)
}

fn watch(session: &Session) -> Result<(), Box<dyn Error>> {
    let activation = session.store.activation();
    let state = block_on(activation.initialize(session.configuration.startup_policy))?;
    log::info!("[watch] cold start finished, proxy {}", state.label());

    let channel = session.channel()?;
    let mut toggle = QuickToggle::new(session.store.clone(), &channel);
    if let Some(line) = toggle_line(&toggle) {
        println!("{line}");
    }

    loop {
        std::thread::sleep(WATCH_INTERVAL);
        if let Err(error) = session.storage.refresh() {
            log::warn!("[watch] {error}");
            continue;
        }
        if toggle.sync()
            && let Some(line) = toggle_line(&toggle)
        {
            println!("{line}");
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let configuration_path = cli.config.unwrap_or_else(Configuration::default_path);
    let session = Session::open(configuration_path);
    let store = &session.store;

    match cli.command {
        Command::Status => {
            let state = block_on(store.state())?;
            println!("{}", status_line(&state));
        }
        Command::List => {
            let state = block_on(store.state())?;
            print_profiles(&state);
        }
        Command::On => {
            block_on(store.activation().toggle_on())?;
            let state = block_on(store.state())?;
            println!("{}", status_line(&state));
        }
        Command::Off => {
            block_on(store.activation().toggle_off())?;
            let state = block_on(store.state())?;
            println!("{}", status_line(&state));
        }
        Command::Toggle => {
            block_on(store.state())?;
            let channel = session.channel()?;
            let mut toggle = QuickToggle::new(store.clone(), &channel);
            let result = block_on(toggle.toggle());
            if let Some(line) = toggle_line(&toggle) {
                println!("{line}");
            }
            result?;
        }
        Command::Use { id } => {
            block_on(store.state())?;
            let channel = session.channel()?;
            let mut toggle = QuickToggle::new(store.clone(), &channel);
            let result = block_on(toggle.select_profile(&ProfileId::new(id)));
            if let Some(line) = toggle_line(&toggle) {
                println!("{line}");
            }
            result?;
        }
        Command::Add(arguments) => {
            let channel = session.channel()?;
            let mut page = SettingsPage::new(store.clone(), &channel);
            page.new_profile();
            let id = save_profile(&mut page, &arguments)?;
            println!("created {id}");
        }
        Command::Edit { id, fields } => {
            block_on(store.state())?;
            let channel = session.channel()?;
            let mut page = SettingsPage::new(store.clone(), &channel);
            page.edit(&ProfileId::new(id))?;
            let id = save_profile(&mut page, &fields)?;
            println!("updated {id}");
        }
        Command::Remove { id } => {
            let channel = session.channel()?;
            let mut page = SettingsPage::new(store.clone(), &channel);
            block_on(page.delete(&ProfileId::new(id)))?;
            if let Some(state) = page.state() {
                println!("{}", status_line(state));
            }
        }
        Command::Startup => {
            let activation = store.activation();
            block_on(activation.initialize(session.configuration.startup_policy))?;
            let state = block_on(store.state())?;
            println!("{}", status_line(&state));
        }
        Command::Watch => watch(&session)?,
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("proxy_switch=info"),
    )
    .init();

    log::debug!(
        "proxy-switch v{} starting (RUST_LOG={})",
        env!("CARGO_PKG_VERSION"),
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<default: info>".into()),
    );

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            log::error!("{error}");
            eprintln!("error: {error}");
            ExitCode::FAILURE
        }
    }
}
