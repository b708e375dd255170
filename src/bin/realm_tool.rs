use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use realmstore::backend::{ApplyMode, BackendConfig, MemoryBackend, MetaBackend, SchemaCore};
use realmstore::delta::{Delta, DeltaCommand, DeltaRepo, DeltaSet};
use realmstore::schema::RealmMeta;
use realmstore::FileDeltaRepo;
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "realm-tool")]
#[command(about = "Inspect and update a file-backed realm delta repository")]
struct Cli {
    /// Directory holding the delta repository
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Reference to read and advance
    #[arg(long, global = true, default_value = realmstore::HEAD_REF)]
    reference: String,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the delta the reference points at
    Head,
    /// List the history up to the reference, oldest first
    Log,
    /// Rebuild the schema from the history and print it
    Show,
    /// Apply the deltas in a JSON file
    Apply {
        #[arg(long)]
        file: PathBuf,

        /// Apply every delta of a multi-delta file instead of only the first
        #[arg(long)]
        sequential: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Head => head(&cli.repo, &cli.reference),
        Command::Log => log(&cli.repo, &cli.reference),
        Command::Show => show(&cli.repo, &cli.reference),
        Command::Apply { file, sequential } => {
            let mode = if sequential {
                ApplyMode::Sequential
            } else {
                ApplyMode::Representative
            };
            apply(&cli.repo, &cli.reference, &file, mode)
        }
    }
}

fn open_repo(dir: &Path) -> Result<FileDeltaRepo> {
    FileDeltaRepo::open(dir)
        .with_context(|| format!("Failed to open delta repository in '{}'", dir.display()))
}

fn head(dir: &Path, reference: &str) -> Result<()> {
    let repo = open_repo(dir)?;
    let Some(id) = repo.get_delta_ref(reference)? else {
        println!("{}: (unset)", reference);
        return Ok(());
    };

    let delta = repo
        .load_delta(&id)?
        .ok_or_else(|| anyhow!("{} points at missing delta {}", reference, id))?;
    println!("{}: {}", reference, id);
    if let Some(comment) = delta.comment() {
        println!("  {}", comment);
    }
    for command in delta.commands() {
        println!("  - {}", command_summary(command));
    }
    Ok(())
}

fn log(dir: &Path, reference: &str) -> Result<()> {
    let repo = open_repo(dir)?;
    let history = repo.history_to_ref(reference)?;

    if history.is_empty() {
        println!("No deltas up to {}", reference);
        return Ok(());
    }

    for delta in &history {
        println!(
            "{}  {}  {} command(s){}",
            delta.id(),
            delta.created_at().format("%Y-%m-%d %H:%M:%S"),
            delta.commands().len(),
            delta
                .comment()
                .map(|c| format!("  {}", c))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn show(dir: &Path, reference: &str) -> Result<()> {
    let core = SchemaCore::replay(open_repo(dir)?, ApplyMode::Sequential, reference)?;
    let meta = core.getmeta()?;
    print_meta(&meta);
    Ok(())
}

fn apply(dir: &Path, reference: &str, file: &Path, mode: ApplyMode) -> Result<()> {
    let deltas = read_deltas(file)?;
    let count = deltas.len();

    let config = BackendConfig::new().apply_mode(mode).head_ref(reference);
    let backend = MemoryBackend::restore(|| FileDeltaRepo::open(dir), config)
        .with_context(|| format!("Failed to load schema from '{}'", dir.display()))?;

    backend
        .apply_delta(deltas)
        .with_context(|| format!("Failed to apply deltas from '{}'", file.display()))?;

    let head = backend
        .deltarepo()?
        .get_delta_ref(reference)?
        .ok_or_else(|| anyhow!("{} is unset after applying deltas", reference))?;
    println!("Applied {} delta(s), {} is now {}", count, reference, head);
    Ok(())
}

/// Accept either a single delta object or an array of deltas
fn read_deltas(file: &Path) -> Result<DeltaSet> {
    let content = fs::read_to_string(file)
        .with_context(|| format!("Failed to read delta file '{}'", file.display()))?;

    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("'{}' is not valid JSON", file.display()))?;

    let deltas = if value.is_array() {
        serde_json::from_value::<DeltaSet>(value)?
    } else {
        DeltaSet::from(serde_json::from_value::<Delta>(value)?)
    };

    if deltas.is_empty() {
        return Err(anyhow!("'{}' contains no deltas", file.display()));
    }
    Ok(deltas)
}

fn print_meta(meta: &RealmMeta) {
    if meta.is_empty() {
        println!("(empty schema)");
        return;
    }

    println!("Modules:");
    for module in meta.modules() {
        println!("  {}", module);
    }

    println!("Concepts:");
    for concept in meta.concepts() {
        let mut line = format!("  {}", concept.name);
        if concept.is_abstract {
            line.push_str(" (abstract)");
        }
        if !concept.bases.is_empty() {
            let bases: Vec<String> = concept.bases.iter().map(|b| b.to_string()).collect();
            line.push_str(&format!(" extends {}", bases.join(", ")));
        }
        println!("{}", line);
    }

    println!("Links:");
    for link in meta.links() {
        println!(
            "  {}: {} -> {} [{:?}]",
            link.name, link.source, link.target, link.cardinality
        );
    }
}

fn command_summary(command: &DeltaCommand) -> String {
    match command {
        DeltaCommand::CreateModule { name } => format!("create module {}", name),
        DeltaCommand::DeleteModule { name } => format!("delete module {}", name),
        DeltaCommand::CreateConcept(def) => format!("create concept {}", def.name),
        DeltaCommand::DeleteConcept { name } => format!("delete concept {}", name),
        DeltaCommand::AlterConceptBases { name, bases } => format!(
            "alter concept {} bases [{}]",
            name,
            bases.iter().map(|b| b.to_string()).collect::<Vec<_>>().join(", ")
        ),
        DeltaCommand::CreateLink(def) => format!("create link {}", def.name),
        DeltaCommand::DeleteLink { name } => format!("delete link {}", name),
    }
}
