use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use strata::config::{self, RunOptions};
use strata::{output, site};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Static site builder over layered source directories")]
#[command(long_about = "\
Static site builder over layered source directories

Sources are listed in precedence order in strata.toml. A file present in
several sources is taken from the first one that has it, so a site can
override any file of the themes it builds on.

Source structure:

  src/
  ├── metadata.json                # Site metadata (merged across sources)
  ├── content/                     # Pages → rendered, renamed to clean URLs
  │   ├── index.md                 # → index.html
  │   ├── about.md                 # → about/index.html
  │   └── feed.xml.tera            # → feed.xml
  ├── static/                      # Assets → copied (and transformed/minified)
  │   └── site.css                 # → site.css
  ├── layouts/base.tera            # Page wrapper ({{ content }})
  ├── partials/nav.html            # {% include \"partials/nav\" %}
  ├── helpers/year.toml            # Template function bound to a builtin
  └── decorators/shout.toml        # Template filter bound to a builtin

Unchanged files are skipped on rebuild. Use --no-changed to rebuild
everything, --remove to start from an empty destination.

Run 'strata gen-config' to generate a documented strata.toml.")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file (default: <DIR>/strata.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the site into the destination directory
    Build(BuildArgs),
    /// Validate config and list the resolved file set without building
    Check {
        /// Working directory
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
    /// Print a stock strata.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Working directory
    #[arg(default_value = ".")]
    dir: PathBuf,

    /// Development build: no minification, site_url points at the dev host
    #[arg(short, long)]
    development: bool,

    /// Delete the destination before building
    #[arg(short, long)]
    remove: bool,

    /// Rebuild every file, ignoring the build manifest
    #[arg(long)]
    no_changed: bool,

    /// Skip the CSS transform command
    #[arg(long)]
    no_transform_css: bool,

    /// Skip the JS transform command
    #[arg(long)]
    no_transform_js: bool,

    /// Skip minification
    #[arg(long)]
    no_minify: bool,
}

impl BuildArgs {
    fn options(&self) -> RunOptions {
        RunOptions {
            development: self.development,
            remove: self.remove,
            no_changed: self.no_changed,
            no_transform_css: self.no_transform_css,
            no_transform_js: self.no_transform_js,
            no_minify: self.no_minify,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Build(args) => {
            let config = load(cli.config.as_deref(), &args.dir)?;
            let report = site::build(&args.dir, config, args.options()).await?;
            output::print_build_output(&report);
        }
        Command::Check { dir } => {
            let config = load(cli.config.as_deref(), &dir)?;
            let report = site::check(&dir, &config)?;
            output::print_check_output(&report);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }
    Ok(())
}

fn load(explicit: Option<&Path>, dir: &Path) -> Result<config::SiteConfig, config::ConfigError> {
    match explicit {
        // An explicit path must exist; the default one may be absent.
        Some(path) => {
            std::fs::metadata(path)?;
            config::load_config(path)
        }
        None => config::load_config(&dir.join(config::CONFIG_FILENAME)),
    }
}

/// `RUST_LOG` wins; otherwise warn, raised by each `-v`.
fn init_logging(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        };
        EnvFilter::new(format!("warn,strata={level}"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
