use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use evogen::compile::resolver::{DependencyResolver, MavenCentral};
use evogen::compile::validator::CompilerValidator;
use evogen::config::{Config, Provider};
use evogen::discovery::discover_units;
use evogen::executor::run::CancelToken;
use evogen::llm::client::LlmClient;
use evogen::logger::{self, LogOptions};
use evogen::pipeline::{PipelineOptions, UnitPipeline};
use evogen::scheduler::{Scheduler, SchedulerOptions};
use evogen::testgen::cache::DependencyCache;
use evogen::testgen::candidate::{CompilationUnit, ProjectLayout};
use evogen::testgen::generator::{DisabledGenerator, EvoSuiteGenerator, InspirationSource};

#[derive(Parser)]
#[command(
    name = "evogen",
    version,
    about = "Synthesizes JUnit 5 tests per class and proves they compile, fetching missing dependencies as it goes."
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Generate tests for every compiled class in the project
    Run,
    /// Generate a test for a single fully-qualified class
    Unit {
        #[arg(help = "Fully-qualified class name, e.g. org.example.Calculator")]
        class: String,
    },
    /// List the classes a full run would process
    Discover,
}

#[derive(Args, Debug, Clone)]
struct GlobalOpts {
    #[arg(long, global = true, help = "Path to config.toml")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Project root (overrides project_root)")]
    project: Option<PathBuf>,

    #[arg(long, global = true, help = "Worker threads")]
    threads: Option<usize>,

    #[arg(long, global = true, help = "Compile attempts per candidate")]
    max_attempts: Option<u32>,

    #[arg(long, global = true, help = "LLM provider: groq | gemini | openai")]
    provider: Option<String>,

    #[arg(long, global = true, help = "LLM model name")]
    model: Option<String>,

    #[arg(long, global = true, default_value_t = false, help = "Skip the EvoSuite inspiration step")]
    no_generator: bool,

    #[arg(
        long,
        global = true,
        default_value_t = false,
        help = "Fail a unit when no inspiration could be generated"
    )]
    require_inspiration: bool,

    #[arg(long, global = true, help = "Write the run summary as JSON to this path")]
    report: Option<PathBuf>,

    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[arg(long, global = true, default_value_t = false, help = "Emit logs as JSON lines")]
    log_json: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    logger::init(LogOptions {
        verbose: cli.opts.verbose,
        json: cli.opts.log_json,
    });

    let cfg = load_config(&cli.opts)?;
    let layout = ProjectLayout::new(cfg.project_root.clone(), cfg.layout.clone());

    let (units, width) = match &cli.command {
        CliCommand::Discover => {
            for unit in discover_units(&layout.classes_dir()) {
                println!("{unit}");
            }
            return Ok(());
        }
        CliCommand::Unit { class } => (vec![CompilationUnit::new(class.trim())], 1),
        CliCommand::Run => {
            let units = discover_units(&layout.classes_dir());
            if units.is_empty() {
                warn!(dir = %layout.classes_dir().display(), "no compiled classes found; did you build the project?");
                return Ok(());
            }
            (units, cfg.parallelism)
        }
    };

    // fail fast on credentials before any unit is scheduled
    let synthesizer = Arc::new(LlmClient::from_config(&cfg.llm)?);

    let pipeline = build_pipeline(&cfg, layout, synthesizer)?;

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("interrupt received; cancelling run");
            cancel.cancel();
        })?;
    }

    let mut options = SchedulerOptions::from_config(&cfg);
    options.width = width;

    let summary = Scheduler::with_cancel(options, cancel).run(units, Arc::new(pipeline));

    println!("{}", summary.render());

    if let Some(path) = &cli.opts.report {
        summary.write_json(path)?;
        info!(path = %path.display(), "report written");
    }

    if !summary.is_clean() {
        error!(
            failures = summary.failure_count(),
            unfinished = summary.unfinished.len(),
            "run finished with failures"
        );
        std::process::exit(1);
    }

    Ok(())
}

fn load_config(opts: &GlobalOpts) -> Result<Config, Box<dyn Error>> {
    let mut cfg = Config::load(opts.config.as_deref())?;

    if let Some(p) = &opts.project {
        cfg.project_root = p.clone();
    }
    if let Some(n) = opts.threads {
        cfg.parallelism = n;
    }
    if let Some(n) = opts.max_attempts {
        cfg.compile.max_attempts = n;
    }
    if let Some(name) = &opts.provider {
        cfg.llm.provider =
            Provider::parse(name).ok_or_else(|| format!("unknown provider: {name}"))?;
    }
    if let Some(m) = &opts.model {
        cfg.llm.model = Some(m.clone());
    }
    if opts.no_generator {
        cfg.generator.enabled = false;
    }
    if opts.require_inspiration {
        cfg.generator.require_inspiration = true;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn build_pipeline(
    cfg: &Config,
    layout: ProjectLayout,
    synthesizer: Arc<LlmClient>,
) -> Result<UnitPipeline, Box<dyn Error>> {
    let cache = Arc::new(DependencyCache::open(&cfg.compile.cache_dir)?);
    info!(dir = %cache.dir().display(), cached = cache.archives().len(), "dependency cache ready");

    let registry = MavenCentral::new(&cfg.registry)?;
    let resolver = Arc::new(DependencyResolver::new(registry, Arc::clone(&cache)));
    let validator = Arc::new(CompilerValidator::new(&cfg.compile));

    let generator: Arc<dyn InspirationSource> = if cfg.generator.enabled {
        Arc::new(EvoSuiteGenerator::new(cfg.generator.clone(), layout.clone()))
    } else {
        info!("inspiration generator disabled");
        Arc::new(DisabledGenerator)
    };

    let options = PipelineOptions {
        max_attempts: cfg.compile.max_attempts,
        base_archives: cfg.compile.base_archives.clone(),
        require_inspiration: cfg.generator.require_inspiration,
    };

    Ok(UnitPipeline::new(
        layout,
        options,
        generator,
        synthesizer,
        validator,
        resolver,
        cache,
    ))
}
