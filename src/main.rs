/// modfed - Module Archive Resolution CLI
use modfed::{AggregateResolver, LoaderConfig, ModKey, ModuleAccessor, ModuleRegistry, Symbol};
use std::env;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::Level;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_usage() {
    eprintln!("modfed v{}", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    modfed [OPTIONS] <ARCHIVE>...");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -h, --help              Print this help message");
    eprintln!("    -V, --version           Print version information");
    eprintln!("    -c, --config <FILE>     Read loader configuration from FILE (modfed.toml)");
    eprintln!("    --class <NAME>          Resolve a dotted class name (repeatable)");
    eprintln!("    --resource <PATH>       Resolve a resource path (repeatable)");
    eprintln!("    --all <PATH>            List every module containing PATH (repeatable)");
    eprintln!("    --list                  List the entries of each installed module");
    eprintln!("    -v, --verbose           Increase log verbosity (repeatable)");
    eprintln!("    -q, --quiet             Only log errors");
    eprintln!();
    eprintln!("ARGUMENTS:");
    eprintln!("    <ARCHIVE>               Module archive; its file stem is the module key");
    eprintln!();
    eprintln!("EXAMPLES:");
    eprintln!("    modfed --class com.acme.Report plugins/*.jar");
    eprintln!("    modfed --resource conf/app.properties --list reports.jar");
}

fn print_version() {
    println!("modfed {}", VERSION);
}

enum Query {
    Class(String),
    Resource(String),
    All(String),
}

struct Options {
    archives: Vec<PathBuf>,
    config: Option<PathBuf>,
    queries: Vec<Query>,
    list: bool,
    verbosity: i8,
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();

    let mut archives = Vec::new();
    let mut config = None;
    let mut queries = Vec::new();
    let mut list = false;
    let mut verbosity = 0i8;
    let mut i = 1;

    let value = |i: usize, flag: &str| -> Result<String, String> {
        args.get(i)
            .cloned()
            .ok_or_else(|| format!("Missing value after {}", flag))
    };

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-V" | "--version" => {
                print_version();
                process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                config = Some(PathBuf::from(value(i, "--config")?));
            }
            "--class" => {
                i += 1;
                queries.push(Query::Class(value(i, "--class")?));
            }
            "--resource" => {
                i += 1;
                queries.push(Query::Resource(value(i, "--resource")?));
            }
            "--all" => {
                i += 1;
                queries.push(Query::All(value(i, "--all")?));
            }
            "--list" => {
                list = true;
            }
            "-v" | "--verbose" => {
                verbosity = verbosity.saturating_add(1);
            }
            "-q" | "--quiet" => {
                verbosity = -1;
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            arg => {
                archives.push(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(Options {
        archives,
        config,
        queries,
        list,
        verbosity,
    })
}

fn init_logging(verbosity: i8) {
    let level = match verbosity {
        i8::MIN..=-1 => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<LoaderConfig, String> {
    let config = match path {
        Some(path) => LoaderConfig::load(path).map_err(|e| e.to_string())?,
        None => LoaderConfig::default(),
    };
    Ok(config.with_env_overrides())
}

fn module_key(path: &Path) -> ModKey {
    path.file_stem()
        .map(|stem| ModKey::from(stem.to_string_lossy().into_owned()))
        .unwrap_or_else(|| ModKey::from(path.display().to_string()))
}

fn run(options: &Options) -> Result<bool, String> {
    let config = load_config(options.config.as_deref())?;
    let registry = Arc::new(ModuleRegistry::with_config(config));
    let resolver = AggregateResolver::attach(&registry);

    let entries = options
        .archives
        .iter()
        .map(|path| (module_key(path), path.clone()))
        .collect();
    let mut installed = 0;
    let mut failed = 0;
    for result in registry.install_all(entries) {
        match result {
            Ok(module) => {
                registry.enable(module.key()).map_err(|e| e.to_string())?;
                installed += 1;
            }
            Err(e) => {
                eprintln!("Error: {}", e);
                failed += 1;
            }
        }
    }
    if installed == 0 {
        return Err("No module archive could be installed".to_string());
    }

    if options.list {
        for module in registry.list_enabled_modules() {
            println!("[{}] {}", module.key(), module.loader().archive().display());
            for entry in module.loader().entries() {
                println!("    {}", entry);
            }
        }
    }

    let mut all_found = true;
    for query in &options.queries {
        match query {
            Query::Class(name) => match Symbol::class(name.as_str()) {
                Ok(symbol) => match resolver.resolve(&symbol) {
                    Ok(resolved) => println!(
                        "{}\t{}\t{} bytes",
                        name,
                        resolved.owner,
                        resolved.bytes.len()
                    ),
                    Err(e) => {
                        all_found = false;
                        println!("{}\t-\t{}", name, e);
                    }
                },
                Err(e) => {
                    all_found = false;
                    println!("{}\t-\t{}", name, e);
                }
            },
            Query::Resource(path) => match resolver.resolve_resource(path) {
                Ok(location) => {
                    let owner = Symbol::resource(path.as_str())
                        .ok()
                        .and_then(|symbol| resolver.owner_of(&symbol))
                        .map(|key| key.to_string())
                        .unwrap_or_else(|| "-".to_string());
                    println!("{}\t{}\t{}", path, owner, location);
                }
                Err(e) => {
                    all_found = false;
                    println!("{}\t-\t{}", path, e);
                }
            },
            Query::All(path) => {
                let found = resolver
                    .resolve_all_resources(path)
                    .map_err(|e| e.to_string())?;
                if found.is_empty() {
                    all_found = false;
                    println!("{}\t-\tnot found", path);
                }
                for (owner, location) in found {
                    println!("{}\t{}\t{}", path, owner, location);
                }
            }
        }
    }

    tracing::debug!(target: "modfed::cli", stats = ?resolver.stats(), "Resolver statistics");
    // Queries still run against the modules that did install.
    if failed > 0 {
        return Err(format!("{} module archive(s) could not be installed", failed));
    }
    Ok(all_found)
}

fn main() {
    let options = match parse_args() {
        Ok(opts) => opts,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if options.archives.is_empty() {
        eprintln!("Error: Missing module archive");
        eprintln!();
        print_usage();
        process::exit(1);
    }

    init_logging(options.verbosity);

    match run(&options) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
