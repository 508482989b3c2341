use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;

use proxy_browser::search::{self, SearchEngine};
use proxy_browser::settings::{FileStorage, RewritingEngine, SettingsStore, Transport};

#[derive(Parser)]
#[command(name = "proxy-browser-cli")]
#[command(about = "Client for a running proxy-browser server", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:3000")]
    url: String,

    /// Preference file (JSON object keyed like browser local storage).
    #[arg(short, long, default_value = "proxy-settings.json")]
    settings: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Status,
    /// Resolve input to a destination URL with the saved search engine
    Search { input: String },
    /// Ask the server for the proxied URL of an input, using saved preferences
    Open { input: String },
    /// Inspect or change saved preferences
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set { key: SettingKey, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SettingKey {
    Engine,
    Transport,
    Search,
    ClearCookies,
    BlockAds,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let store = SettingsStore::new(FileStorage::new(&cli.settings));
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Status => {
            let res = client.get(format!("{}/health", cli.url)).send().await?;
            print_response(res).await?;
        }
        Commands::Search { input } => {
            let Some(input) = search::normalize_input(&input) else {
                eprintln!("Error: input is empty");
                return Ok(());
            };
            println!("{}", search::resolve(input, store.load().search_engine));
        }
        Commands::Open { input } => {
            let prefs = store.load();
            let res = client
                .get(format!("{}/api/proxy", cli.url))
                .query(&[
                    ("q", input.as_str()),
                    ("engine", prefs.rewriting_engine.as_str()),
                    ("transport", prefs.transport.as_str()),
                    ("search", prefs.search_engine.as_str()),
                ])
                .send()
                .await?;
            print_response(res).await?;
        }
        Commands::Settings { action: SettingsAction::Show } => {
            println!("{}", serde_json::to_string_pretty(&store.load())?);
        }
        Commands::Settings {
            action: SettingsAction::Set { key, value },
        } => {
            let mut prefs = store.load();
            match key {
                SettingKey::Engine => prefs.rewriting_engine = value.parse::<RewritingEngine>()?,
                SettingKey::Transport => prefs.transport = value.parse::<Transport>()?,
                SettingKey::Search => prefs.search_engine = value.parse::<SearchEngine>()?,
                SettingKey::ClearCookies => prefs.clear_cookies = value.parse()?,
                SettingKey::BlockAds => prefs.block_ads = value.parse()?,
            }
            store.save(&prefs)?;
            println!("{}", serde_json::to_string_pretty(&prefs)?);
        }
    }

    Ok(())
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: server returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
