use clap::{Parser, Subcommand, Args};
use dental_deserts::prelude::*;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ddcli")]
#[command(about = "Dental deserts CLI - fuse practice, population and deprivation data into per-area map layers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build practices, area metrics, boundaries and the QA report
    Build(BuildArgs),
    /// Run the pipeline and print the QA summary without writing outputs
    Qa(QaArgs),
    /// Show or initialise the configuration file
    Config(ConfigArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Directory containing practices.csv and the other raw inputs
    #[arg(short, long)]
    data_dir: PathBuf,
    /// Directory for the processed outputs
    #[arg(short, long)]
    out_dir: PathBuf,
    /// Geocode cache file (defaults to <data-dir>/../cache/postcodes.json)
    #[arg(long)]
    cache: Option<PathBuf>,
    /// TOML configuration file
    #[arg(long, env = "DENTAL_CONFIG")]
    config: Option<PathBuf>,
    /// Resolve cache misses through the live postcode lookup
    #[arg(long)]
    live: bool,
    /// Pretty-print the JSON outputs
    #[arg(long)]
    pretty: bool,
}

#[derive(Args)]
struct QaArgs {
    /// Directory containing practices.csv and the other raw inputs
    #[arg(short, long)]
    data_dir: PathBuf,
    /// TOML configuration file
    #[arg(long, env = "DENTAL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ConfigArgs {
    /// Print the effective configuration
    #[arg(long)]
    show: bool,
    /// Write the default configuration to this path
    #[arg(long)]
    init: Option<PathBuf>,
}

fn main() {
    pretty_env_logger::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Build(args) => cmd_build(args),
        Commands::Qa(args) => cmd_qa(args),
        Commands::Config(args) => cmd_config(args),
    }
}

fn fail(e: DesertError) -> ! {
    eprintln!("Error: {}", e.user_message());
    std::process::exit(1);
}

fn load_config(path: Option<&PathBuf>) -> DesertConfig {
    match path {
        Some(path) => DesertConfig::layered(Some(path.as_path())).unwrap_or_else(|e| fail(e)),
        None => DesertConfig::load(),
    }
}

fn cmd_build(args: BuildArgs) {
    let mut config = load_config(args.config.as_ref());
    if args.live {
        config.enable_live_lookup = true;
    }

    let mut pipeline = DesertPipeline::from_directory(&args.data_dir)
        .unwrap_or_else(|e| fail(e))
        .config(config);
    if let Some(cache) = &args.cache {
        pipeline = pipeline.cache_path(cache);
    }

    let output = pipeline.run().unwrap_or_else(|e| fail(e));
    let writer = OutputWriter::new(&args.out_dir).with_pretty_print(args.pretty);
    match writer.write_all(&output) {
        Ok(paths) => {
            for path in &paths {
                println!("Wrote {}", path.display());
            }
            println!(
                "Practices: {} | Areas: {} | Geocoding success: {:.2}%",
                output.qa.counts.practices_total,
                output.metrics.len(),
                output.qa.geocoding_success_rate
            );
        }
        Err(e) => fail(e),
    }
}

fn cmd_qa(args: QaArgs) {
    let config = load_config(args.config.as_ref());
    let output = DesertPipeline::from_directory(&args.data_dir)
        .map(|p| p.config(config).persist_cache(false))
        .and_then(|p| p.run())
        .unwrap_or_else(|e| fail(e));
    output.qa.print_summary();
}

fn cmd_config(args: ConfigArgs) {
    if let Some(path) = &args.init {
        match DesertConfig::default().save(path) {
            Ok(()) => println!("Wrote default configuration to {}", path.display()),
            Err(e) => fail(e),
        }
        return;
    }

    if args.show {
        let config = DesertConfig::load();
        match toml::to_string_pretty(&config) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    match DesertConfig::default_config_path() {
        Some(path) => println!("Default config path: {}", path.display()),
        None => println!("No default config path on this platform"),
    }
}
