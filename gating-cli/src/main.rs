use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use flow_events::{FlagColumn, read_text_events_from_path, write_text_events_to_path};
use flow_gates::{GateTreesFormat, read_gate_trees_from_path, write_gate_trees_to_path};
use flow_gating::{
    DafiConfig, GatingCache, GatingEngine, load_gating_cache, read_cache_header, save_gating_cache,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// flowgate - hierarchical gating for flow cytometry data
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "flowgate")]
#[command(about = "Build, gate and export flow cytometry gating caches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output (debug logging unless RUST_LOG is set)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Combine an event text file and a gate file into a new gating cache
    Build {
        /// Tab-separated event file (header line of parameter names)
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        /// Gate trees as JSON or Gating-ML XML
        #[arg(value_name = "GATES")]
        gates: PathBuf,

        /// Path of the cache file to write
        #[arg(short, long, value_name = "CACHE")]
        output: PathBuf,

        /// Format used to store the gate trees inside the cache
        #[arg(short, long, value_enum, default_value = "json")]
        format: TreeFormatArg,
    },

    /// Compute every gate in a cache and save the result
    Gate {
        #[arg(value_name = "CACHE")]
        cache: PathBuf,

        /// Where to write the gated cache (defaults to overwriting the input)
        #[arg(short, long, value_name = "CACHE")]
        output: Option<PathBuf>,

        /// Discard previously computed gates and start over
        #[arg(long)]
        reset: bool,

        #[command(flatten)]
        dafi: DafiArgs,
    },

    /// Summarize the tables, gates and inclusion counts of a cache
    Info {
        #[arg(value_name = "CACHE")]
        cache: PathBuf,
    },

    /// Write the source events plus one 0/1 column per applied gate
    Export {
        #[arg(value_name = "CACHE")]
        cache: PathBuf,

        /// Tab-separated output file
        #[arg(short, long, value_name = "EVENTS")]
        output: PathBuf,
    },

    /// Write the gate trees of a cache as JSON or Gating-ML XML
    Gates {
        #[arg(value_name = "CACHE")]
        cache: PathBuf,

        #[arg(short, long, value_name = "GATES")]
        output: PathBuf,

        /// Output format (guessed from the output extension if not given, else JSON)
        #[arg(short, long, value_enum)]
        format: Option<TreeFormatArg>,
    },
}

/// Cluster-centroid settings; flags override values from `--config`
#[derive(Args, Debug, Default)]
struct DafiArgs {
    /// JSON file with `cluster_count`, `iterations` and `seed`
    #[arg(long, value_name = "CONFIG_JSON")]
    config: Option<PathBuf>,

    /// Number of clusters per clustered gate
    #[arg(short = 'k', long)]
    clusters: Option<usize>,

    /// Number of centroid refinement passes
    #[arg(short, long)]
    iterations: Option<usize>,

    /// Master random seed
    #[arg(short, long)]
    seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TreeFormatArg {
    Json,
    Gatingml,
}

impl From<TreeFormatArg> for GateTreesFormat {
    fn from(format: TreeFormatArg) -> Self {
        match format {
            TreeFormatArg::Json => GateTreesFormat::Json,
            TreeFormatArg::Gatingml => GateTreesFormat::GatingMl,
        }
    }
}

/// Flags over `--config` over `base`, the configuration a cache was already gated with
fn resolve_config(args: &DafiArgs, base: Option<&DafiConfig>) -> Result<DafiConfig> {
    let mut config = match &args.config {
        Some(path) => DafiConfig::from_json_path(path)
            .with_context(|| format!("Failed to load clustering config {}", path.display()))?,
        None => base.cloned().unwrap_or_default(),
    };
    if let Some(clusters) = args.clusters {
        config.cluster_count = clusters;
    }
    if let Some(iterations) = args.iterations {
        config.iterations = iterations;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.validate()?;
    debug!("Clustering config: {config:?}");
    Ok(config)
}

fn build(events: &Path, gates: &Path, output: &Path, format: GateTreesFormat) -> Result<()> {
    let table = read_text_events_from_path(events)
        .with_context(|| format!("Failed to read events from {}", events.display()))?;
    let (trees, _) = read_gate_trees_from_path(gates)
        .with_context(|| format!("Failed to read gates from {}", gates.display()))?;
    let cache = GatingCache::new(table, trees)?;
    save_gating_cache(output, &cache, format)?;
    println!(
        "✅ Built cache with {} events and {} gates: {}",
        cache.number_of_events(),
        cache.trees().number_of_gates(),
        output.display()
    );
    Ok(())
}

fn gate(input: &Path, output: Option<&Path>, reset: bool, dafi: &DafiArgs) -> Result<()> {
    let tree_format = read_cache_header(input)?.tree_format;
    let mut cache = load_gating_cache(input)?;
    if reset {
        cache.reset();
    }
    let recorded = cache.clustering_config().filter(|_| cache.is_any_applied()).cloned();
    let config = resolve_config(dafi, recorded.as_ref())?;
    if let Some(recorded) = recorded {
        if recorded != config {
            bail!(
                "{} was gated with {recorded:?}; pass --reset to regate it with {config:?}",
                input.display()
            );
        }
        warn!("Cache already has applied gates; only the remaining gates will be computed");
    }

    let labels: Vec<String> = cache.trees().iter().map(|(_, gate)| gate.label()).collect();
    let pb = ProgressBar::new(labels.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let mut engine = GatingEngine::with_config(&mut cache, config)?;
    engine.gate_all_with_progress(|id, done, _| {
        pb.set_position(done as u64);
        if let Some(label) = labels.get(id.index()) {
            pb.set_message(label.clone());
        }
    })?;
    pb.finish_with_message("Gating complete");
    info!("Gated in {:.2?}", start.elapsed());

    let output = output.unwrap_or(input);
    save_gating_cache(output, &cache, tree_format)?;
    println!("✅ Saved gated cache to {}", output.display());
    Ok(())
}

fn info(path: &Path) -> Result<()> {
    let header = read_cache_header(path)?;
    let cache = load_gating_cache(path)?;
    let source = cache.source();

    println!("📂 {}", path.display());
    println!(
        "   {} events, {} parameters, {} values, {} byte order, gates stored as {}",
        header.number_of_events,
        source.number_of_parameters(),
        header.width,
        header.byte_order.to_keyword_str(),
        header.tree_format
    );
    if let Some(config) = cache.clustering_config() {
        println!(
            "   gated with K = {}, {} iterations, seed {}",
            config.cluster_count, config.iterations, config.seed
        );
    }

    println!("\nParameters:");
    for parameter in source.parameters() {
        println!(
            "   {:<16} {:<20} [{}, {}]",
            parameter.name,
            parameter.long_name.as_deref().unwrap_or(""),
            parameter.best_min(),
            parameter.best_max()
        );
    }

    println!("\nGates:");
    let trees = cache.trees();
    let events = cache.number_of_events();
    for id in trees.find_descendant_gates() {
        let gate = trees.require_gate(id)?;
        let indent = "  ".repeat(trees.depth(id));
        let dimensions: Vec<&str> = gate.dimensions.iter().map(|d| &*d.parameter).collect();
        let counts = match cache.state(id) {
            Some(state) if state.is_applied() => {
                let included = state.included_count();
                let percent = if events == 0 {
                    0.0
                } else {
                    included as f64 / events as f64 * 100.0
                };
                format!("{included} events ({percent:.2}%)")
            }
            _ => "not gated".to_string(),
        };
        println!(
            "   {indent}{id} {} [{} {} on {}]: {counts}",
            gate.label(),
            gate.method,
            gate.shape.kind(),
            dimensions.join(", ")
        );
    }
    Ok(())
}

fn export(path: &Path, output: &Path) -> Result<()> {
    let cache = load_gating_cache(path)?;
    let trees = cache.trees();
    let mut labels = Vec::new();
    let mut flags = Vec::new();
    for id in trees.find_descendant_gates() {
        let Some(state) = cache.state(id).filter(|s| s.is_applied()) else {
            warn!("Skipping gate {id}: not gated yet");
            continue;
        };
        labels.push(trees.require_gate(id)?.label());
        flags.push(state.flags());
    }
    let columns: Vec<FlagColumn<'_>> = labels
        .iter()
        .zip(&flags)
        .map(|(name, flags)| FlagColumn { name, flags })
        .collect();
    write_text_events_to_path(output, cache.source(), &columns)?;
    println!(
        "✅ Exported {} events with {} gate columns to {}",
        cache.number_of_events(),
        columns.len(),
        output.display()
    );
    Ok(())
}

fn export_gates(path: &Path, output: &Path, format: Option<GateTreesFormat>) -> Result<()> {
    let cache = load_gating_cache(path)?;
    let format = format
        .or_else(|| GateTreesFormat::from_path(output))
        .unwrap_or(GateTreesFormat::Json);
    write_gate_trees_to_path(output, cache.trees(), format)?;
    println!(
        "✅ Wrote {} gates as {format} to {}",
        cache.trees().number_of_gates(),
        output.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Command::Build {
            events,
            gates,
            output,
            format,
        } => build(&events, &gates, &output, format.into()),
        Command::Gate {
            cache,
            output,
            reset,
            dafi,
        } => gate(&cache, output.as_deref(), reset, &dafi),
        Command::Info { cache } => info(&cache),
        Command::Export { cache, output } => export(&cache, &output),
        Command::Gates {
            cache,
            output,
            format,
        } => export_gates(&cache, &output, format.map(Into::into)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const EVENTS: &str = "FSC-A\tCD3\n0\t1\n5\t2\n10\t3\n15\t4\n20\t5\n";
    const GATES: &str = r#"{
        "gates": [{
            "name": "Middle",
            "shape": { "type": "rectangle", "bounds": [{ "min": 4.0, "max": 16.0 }] },
            "dimensions": [{ "parameter": "FSC-A" }],
            "children": [{
                "name": "Clustered",
                "method": "cluster-centroid",
                "shape": { "type": "rectangle", "bounds": [{ "min": 0.0, "max": 10.0 }] },
                "dimensions": [{ "parameter": "CD3" }]
            }]
        }]
    }"#;

    fn built_cache(dir: &TempDir) -> PathBuf {
        let events = dir.path().join("events.txt");
        let gates = dir.path().join("gates.json");
        let cache = dir.path().join("run.cache");
        std::fs::write(&events, EVENTS).unwrap();
        std::fs::write(&gates, GATES).unwrap();
        build(&events, &gates, &cache, GateTreesFormat::GatingMl).unwrap();
        cache
    }

    #[test]
    fn test_cli_parses_gate_overrides() {
        let cli = Cli::try_parse_from(["flowgate", "gate", "run.cache", "-k", "8", "--seed", "3", "-v"]).unwrap();
        assert!(cli.verbose);
        let Command::Gate { dafi, reset, .. } = cli.command else {
            panic!("expected the gate subcommand");
        };
        assert!(!reset);
        assert_eq!(dafi.clusters, Some(8));
        assert_eq!(dafi.seed, Some(3));
        assert_eq!(dafi.iterations, None);
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dafi.json");
        std::fs::write(&path, r#"{ "cluster_count": 20, "iterations": 3 }"#).unwrap();
        let args = DafiArgs {
            config: Some(path),
            iterations: Some(5),
            ..Default::default()
        };
        let config = resolve_config(&args, None).unwrap();
        assert_eq!(config.cluster_count, 20);
        assert_eq!(config.iterations, 5);
        assert_eq!(config.seed, 1);

        let zero = DafiArgs {
            clusters: Some(0),
            ..Default::default()
        };
        assert!(resolve_config(&zero, None).is_err());

        let recorded = DafiConfig {
            cluster_count: 12,
            iterations: 6,
            seed: 7,
        };
        let seed_only = DafiArgs {
            seed: Some(8),
            ..Default::default()
        };
        let config = resolve_config(&seed_only, Some(&recorded)).unwrap();
        assert_eq!((config.cluster_count, config.iterations, config.seed), (12, 6, 8));
    }

    #[test]
    fn test_regating_with_other_config_needs_reset() {
        let dir = TempDir::new().unwrap();
        let cache_path = built_cache(&dir);
        let first = DafiArgs {
            clusters: Some(2),
            seed: Some(7),
            ..Default::default()
        };
        gate(&cache_path, None, false, &first).unwrap();
        let gated = load_gating_cache(&cache_path).unwrap();

        let other = DafiArgs {
            clusters: Some(3),
            ..Default::default()
        };
        let err = gate(&cache_path, None, false, &other).unwrap_err();
        assert!(err.to_string().contains("--reset"));
        assert_eq!(load_gating_cache(&cache_path).unwrap(), gated);

        // no flags reuses the recorded configuration
        gate(&cache_path, None, false, &DafiArgs::default()).unwrap();
        assert_eq!(load_gating_cache(&cache_path).unwrap(), gated);

        gate(&cache_path, None, true, &other).unwrap();
        let regated = load_gating_cache(&cache_path).unwrap();
        let config = regated.clustering_config().unwrap();
        assert_eq!((config.cluster_count, config.seed), (3, 1));
    }

    #[test]
    fn test_build_gate_export() {
        let dir = TempDir::new().unwrap();
        let cache_path = built_cache(&dir);
        let dafi = DafiArgs {
            clusters: Some(2),
            ..Default::default()
        };
        gate(&cache_path, None, false, &dafi).unwrap();

        let cache = load_gating_cache(&cache_path).unwrap();
        assert!(cache.states().iter().all(|s| s.is_applied()));
        assert_eq!(read_cache_header(&cache_path).unwrap().tree_format, GateTreesFormat::GatingMl);
        let root = cache.trees().roots()[0];
        assert_eq!(cache.state(root).unwrap().flags(), &[0, 1, 1, 1, 0]);

        let exported = dir.path().join("gated.txt");
        export(&cache_path, &exported).unwrap();
        let table = read_text_events_from_path(&exported).unwrap();
        assert_eq!(table.number_of_parameters(), 4);
        let middle = table.require_parameter("Middle").unwrap();
        assert_eq!(table.column::<f32>(middle).unwrap(), &[0.0, 1.0, 1.0, 1.0, 0.0]);

        let gates = dir.path().join("gates.xml");
        export_gates(&cache_path, &gates, None).unwrap();
        let (trees, format) = read_gate_trees_from_path(&gates).unwrap();
        assert_eq!(format, GateTreesFormat::GatingMl);
        assert_eq!(trees.number_of_gates(), 2);
    }

    #[test]
    fn test_export_skips_ungated_gates() {
        let dir = TempDir::new().unwrap();
        let cache_path = built_cache(&dir);
        let exported = dir.path().join("raw.txt");
        export(&cache_path, &exported).unwrap();
        let table = read_text_events_from_path(&exported).unwrap();
        assert_eq!(table.number_of_parameters(), 2);
        info(&cache_path).unwrap();
    }
}
