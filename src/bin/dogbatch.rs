use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use dialoguer::{Confirm, Input, Password, Select};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use dogbatch::app::{App, FetchRequest, FetchResult, TracingSink};
use dogbatch::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use dogbatch::credentials::{load_token, open_session, save_token};
use dogbatch::disk::YandexDiskClient;
use dogbatch::dogapi::DogApiHttpClient;
use dogbatch::domain::{Limit, Selector, Taxonomy};
use dogbatch::error::DogError;
use dogbatch::manifest::ManifestWriter;
use dogbatch::output::{JsonOutput, LoginResult, OutputMode};
use dogbatch::resolver::{TieBreak, breeds_with_subbreed};
use dogbatch::transfer::CancelToken;
use dogbatch::tui::{Tui, TuiHeader};

#[derive(Parser)]
#[command(name = "dogbatch")]
#[command(about = "Copy dog.ceo breed images to Yandex Disk and record them in a JSON manifest")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Transfer images of a breed or sub-breed")]
    Fetch(FetchArgs),
    #[command(about = "List breeds known to dog.ceo")]
    Breeds(BreedsArgs),
    #[command(about = "Verify and store a Yandex Disk token")]
    Login(LoginArgs),
    #[command(about = "Empty the manifest file")]
    Clear,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    breed: Option<String>,

    #[arg(long)]
    subbreed: Option<String>,

    /// Images per unit: a positive number or `all`.
    #[arg(long)]
    count: Option<String>,

    /// 1-based choice among the breeds sharing the sub-breed.
    #[arg(long, conflicts_with = "random")]
    pick: Option<usize>,

    #[arg(long)]
    random: bool,

    #[arg(long)]
    manifest: Option<String>,

    #[arg(long)]
    remote_root: Option<String>,
}

#[derive(Args)]
struct BreedsArgs {
    /// Show every sub-breed with the breeds it belongs to.
    #[arg(long)]
    subbreeds: bool,
}

#[derive(Args)]
struct LoginArgs {
    #[arg(long)]
    token: Option<String>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<DogError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &DogError) -> u8 {
    match error {
        DogError::InvalidSelector(_)
        | DogError::InvalidCount(_)
        | DogError::BreedUnknown(_)
        | DogError::SubbreedUnknown(_)
        | DogError::SubbreedNotInBreed { .. }
        | DogError::AmbiguousSubbreed { .. }
        | DogError::InvalidTieBreak { .. }
        | DogError::SelectionAborted
        | DogError::MissingCredential
        | DogError::InvalidCredential
        | DogError::ConfigRead(_)
        | DogError::ConfigParse(_)
        | DogError::SettingsRead(_) => 2,
        DogError::TaxonomyUnavailable(_)
        | DogError::DogApiHttp(_)
        | DogError::DogApiStatus { .. }
        | DogError::DogApiPayload(_)
        | DogError::ImageFetch(_)
        | DogError::DiskHttp(_)
        | DogError::DiskStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(source) = &config.source {
        tracing::debug!("using config {}", source.display());
    }

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, config, output_mode),
        Commands::Breeds(args) => run_breeds(args, &config, output_mode),
        Commands::Login(args) => run_login(args, &config, output_mode),
        Commands::Clear => run_clear(&config, output_mode),
    }
}

fn build_app(config: &ResolvedConfig) -> Result<App<DogApiHttpClient>, DogError> {
    let api = DogApiHttpClient::new(&config.dog_api_url, config.timeout)?;
    Ok(App::new(
        api,
        ManifestWriter::new(config.manifest_path.clone()),
        config.remote_root.clone(),
    ))
}

fn run_fetch(args: FetchArgs, config: ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let config = config.with_overrides(&ConfigOverrides {
        manifest_path: args.manifest.as_deref().map(Utf8PathBuf::from),
        remote_root: args.remote_root.clone(),
    });

    let token = load_token(&config.settings_path)?.ok_or(DogError::MissingCredential)?;
    let disk = YandexDiskClient::new(&token, &config.disk_api_url, config.timeout)?;
    let app = build_app(&config)?;
    let interactive = matches!(mode, OutputMode::Interactive);

    // Prompts need the terminal, so every question is asked before the
    // pipeline starts.
    let mut taxonomy = None;
    let selector = match (args.breed.as_deref(), args.subbreed.as_deref()) {
        (None, None) if interactive => {
            let loaded = load_taxonomy(&app);
            let selector = prompt_selector(&loaded)?;
            taxonomy = Some(loaded);
            selector
        }
        (breed, subbreed) => Selector::new(breed, subbreed)?,
    };
    let flagged = TieBreak::from_flags(&selector, args.pick, args.random)?;
    let limit = match args.count.as_deref() {
        Some(count) => count.parse::<Limit>()?,
        None if interactive => prompt_limit()?,
        None => return Err(DogError::InvalidCount("missing --count".to_string()).into()),
    };
    let tie_break = match (flagged, &selector) {
        (Some(tie_break), _) => tie_break,
        (None, Selector::Subbreed(subbreed)) if interactive => {
            let taxonomy = taxonomy.unwrap_or_else(|| load_taxonomy(&app));
            prompt_tie_break(subbreed, &taxonomy)?
        }
        (None, _) => TieBreak::Refuse,
    };

    let request = FetchRequest { selector, limit };
    if interactive {
        let cancel = CancelToken::new();
        let header = TuiHeader {
            selection: request.selector.to_string(),
            limit: request.limit.to_string(),
            destination: format!("disk:{}", app.remote_root()),
        };
        let mut tui = Tui::new(header, cancel.clone());
        let result = tui.run(move |sink| app.run(&disk, &request, &tie_break, &cancel, sink))?;
        print_fetch_summary(&result);
    } else {
        let result = app.run(
            &disk,
            &request,
            &tie_break,
            &CancelToken::new(),
            &TracingSink,
        )?;
        JsonOutput::print_fetch(&result).into_diagnostic()?;
    }
    Ok(())
}

fn run_breeds(args: BreedsArgs, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let app = build_app(config)?;
    if args.subbreeds {
        let result = app.subbreeds(&TracingSink)?;
        match mode {
            OutputMode::NonInteractive => JsonOutput::print_subbreeds(&result).into_diagnostic()?,
            OutputMode::Interactive => {
                for hint in &result.subbreeds {
                    println!("\x1b[36m{}\x1b[0m: {}", hint.subbreed, hint.breeds.join(", "));
                }
            }
        }
    } else {
        let result = app.breeds(&TracingSink)?;
        match mode {
            OutputMode::NonInteractive => JsonOutput::print_breeds(&result).into_diagnostic()?,
            OutputMode::Interactive => {
                for entry in &result.breeds {
                    if entry.subbreeds.is_empty() {
                        println!("\x1b[36m{}\x1b[0m", entry.breed);
                    } else {
                        println!("\x1b[36m{}\x1b[0m: {}", entry.breed, entry.subbreeds.join(", "));
                    }
                }
            }
        }
    }
    Ok(())
}

fn run_login(args: LoginArgs, config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let token = match (args.token, mode) {
        (Some(token), _) => token,
        (None, OutputMode::Interactive) => Password::new()
            .with_prompt("Yandex Disk OAuth token")
            .interact()
            .map_err(prompt_error)?,
        (None, OutputMode::NonInteractive) => return Err(DogError::MissingCredential.into()),
    };

    open_session(Some(&token), |token| {
        YandexDiskClient::new(token, &config.disk_api_url, config.timeout)
    })?;
    save_token(&config.settings_path, &token)?;

    let result = LoginResult {
        settings_path: config.settings_path.to_string(),
        verified: true,
    };
    match mode {
        OutputMode::NonInteractive => JsonOutput::print_login(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("\x1b[32mToken verified and saved to {}\x1b[0m", result.settings_path)
        }
    }
    Ok(())
}

fn run_clear(config: &ResolvedConfig, mode: OutputMode) -> miette::Result<()> {
    let app = build_app(config)?;
    if matches!(mode, OutputMode::Interactive) {
        let confirmed = Confirm::new()
            .with_prompt(format!("Clear {}?", app.manifest().path()))
            .default(false)
            .interact()
            .map_err(prompt_error)?;
        if !confirmed {
            println!("Nothing cleared.");
            return Ok(());
        }
    }

    let result = app.clear(&TracingSink)?;
    match mode {
        OutputMode::NonInteractive => JsonOutput::print_clear(&result).into_diagnostic()?,
        OutputMode::Interactive if result.cleared => {
            println!("\x1b[32mCleared {}\x1b[0m", result.manifest_path)
        }
        OutputMode::Interactive => println!("{} does not exist", result.manifest_path),
    }
    Ok(())
}

fn load_taxonomy(app: &App<DogApiHttpClient>) -> Taxonomy {
    match app.taxonomy(&TracingSink) {
        Ok(taxonomy) => taxonomy,
        Err(err) => {
            tracing::warn!("{err}");
            Taxonomy::default()
        }
    }
}

fn prompt_error(err: dialoguer::Error) -> DogError {
    DogError::Prompt(err.to_string())
}

/// Breed or `-`, then the sub-breed. An empty taxonomy disables the checks.
fn prompt_selector(taxonomy: &Taxonomy) -> Result<Selector, DogError> {
    let breed: String = Input::new()
        .with_prompt("Breed (or - if unknown)")
        .validate_with(|input: &String| -> Result<(), String> {
            let input = input.trim();
            if input == "-" || taxonomy.is_empty() || taxonomy.contains_breed(input) {
                Ok(())
            } else {
                Err(format!("unknown breed: {input}"))
            }
        })
        .interact_text()
        .map_err(prompt_error)?;

    if breed.trim() == "-" {
        let subbreed: String = Input::new()
            .with_prompt("Sub-breed")
            .validate_with(|input: &String| -> Result<(), String> {
                let input = input.trim();
                if input.is_empty() {
                    Err("sub-breed is required".to_string())
                } else if !taxonomy.is_empty() && breeds_with_subbreed(taxonomy, input).is_empty() {
                    Err(format!("unknown sub-breed: {input}"))
                } else {
                    Ok(())
                }
            })
            .interact_text()
            .map_err(prompt_error)?;
        return Selector::new(None, Some(&subbreed));
    }

    let known = taxonomy.subbreeds(&breed).map(<[String]>::to_vec).unwrap_or_default();
    if known.is_empty() {
        return Selector::new(Some(&breed), None);
    }
    let subbreed: String = Input::new()
        .with_prompt(format!("Sub-breed ({}; empty for all)", known.join(", ")))
        .allow_empty(true)
        .validate_with(|input: &String| -> Result<(), String> {
            let input = input.trim().to_lowercase();
            if input.is_empty() || known.contains(&input) {
                Ok(())
            } else {
                Err(format!("{input} is not a sub-breed of {}", breed.trim()))
            }
        })
        .interact_text()
        .map_err(prompt_error)?;
    Selector::new(Some(&breed), Some(&subbreed))
}

fn prompt_limit() -> Result<Limit, DogError> {
    let value: String = Input::new()
        .with_prompt("Images per unit (number or all)")
        .default("all".to_string())
        .validate_with(|input: &String| -> Result<(), String> {
            input
                .parse::<Limit>()
                .map(|_| ())
                .map_err(|err| err.to_string())
        })
        .interact_text()
        .map_err(prompt_error)?;
    value.parse()
}

fn prompt_tie_break(subbreed: &str, taxonomy: &Taxonomy) -> Result<TieBreak, DogError> {
    let candidates = breeds_with_subbreed(taxonomy, subbreed);
    if candidates.len() < 2 {
        return Ok(TieBreak::Refuse);
    }
    let mut items = candidates.clone();
    items.push("random".to_string());
    let choice = Select::new()
        .with_prompt(format!("{subbreed} belongs to several breeds"))
        .items(&items)
        .default(0)
        .interact_opt()
        .map_err(prompt_error)?;
    match choice {
        Some(index) if index < candidates.len() => Ok(TieBreak::Pick(index)),
        Some(_) => Ok(TieBreak::Random),
        None => Err(DogError::SelectionAborted),
    }
}

fn print_fetch_summary(result: &FetchResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";
    let stats = &result.stats;

    println!("{cyan}dogbatch summary{reset}");
    if let Some(resolution) = &result.resolution {
        println!(
            "{cyan}sub-breed {} -> breed {} ({}){reset}",
            resolution.subbreed, resolution.breed, resolution.method
        );
    }
    println!(
        "{green}Transferred: {} of {} image(s){reset}",
        stats.transferred, stats.attempted
    );
    let failures = stats.fetch_failures + stats.upload_failures + stats.directory_failures;
    let color = if failures > 0 { red } else { green };
    println!(
        "{color}Failures: {} download, {} upload, {} directory{reset}",
        stats.fetch_failures, stats.upload_failures, stats.directory_failures
    );
    if stats.empty_units > 0 {
        println!("{yellow}Units without images: {}{reset}", stats.empty_units);
    }
    if result.cancelled {
        println!("{yellow}Cancelled before completion; manifest holds the partial run{reset}");
    }
    for record in &result.records {
        let unit = match &record.subbreed {
            Some(sub) => format!("{}/{}", record.breed, sub),
            None => record.breed.clone(),
        };
        println!("  {unit}/{}", record.file_name);
    }
    println!("{cyan}Manifest: {}{reset}", result.manifest_path);
}
