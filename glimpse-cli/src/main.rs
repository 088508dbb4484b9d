use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use glimpse_core::compare::EmbeddingMatcher;
use glimpse_core::config::Config;
use glimpse_core::detect::{BoundingBox, DetectedFace};
use glimpse_core::embed::Embedding;
use glimpse_core::recognize::{self, ScannedFace, Verdict};
use glimpse_core::store::{FaceStore, StoreBackend};
use glimpse_core::{backend, codec};
use ndarray::Array1;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "glimpse")]
#[command(about = "Face unlock storage and matching", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of the default locations
    #[arg(short, long = "config", global = true)]
    config_path: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new face
    Add {
        /// Name to register the face under
        name: String,
        /// JSON file holding an array of embeddings
        #[arg(long, required_unless_present = "encoded", conflicts_with = "encoded")]
        file: Option<PathBuf>,
        /// Embeddings in stored (encoded) form
        #[arg(long)]
        encoded: Option<String>,
        /// Authentication token, URL-safe base64
        #[arg(long, default_value = "")]
        token: String,
        /// Overwrite an existing face of the same name
        #[arg(long)]
        replace: bool,
    },
    /// Append embeddings to a registered face
    Extend {
        name: String,
        /// JSON file holding an array of embeddings
        #[arg(long)]
        file: PathBuf,
        /// Authentication token, URL-safe base64
        #[arg(long, default_value = "")]
        token: String,
        /// Register the face if it does not exist yet
        #[arg(long)]
        create: bool,
    },
    /// Remove a registered face
    Remove { name: String },
    /// List registered faces
    List,
    /// Print the stored form of a face's embeddings
    Export { name: String },
    /// Match embeddings against every registered face
    Test {
        /// JSON file holding one embedding per face
        #[arg(long)]
        file: PathBuf,
        /// Use the stricter secure distance threshold
        #[arg(long)]
        secure: bool,
    },
    /// Show configuration
    Config {
        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logger
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .init();

    let config = load_config(cli.config_path.as_deref())?;

    match cli.command {
        Commands::Add {
            name,
            file,
            encoded,
            token,
            replace,
        } => cmd_add(&config, name, file, encoded, token, replace),
        Commands::Extend {
            name,
            file,
            token,
            create,
        } => cmd_extend(&config, name, file, token, create),
        Commands::Remove { name } => cmd_remove(&config, name),
        Commands::List => cmd_list(&config),
        Commands::Export { name } => cmd_export(&config, name),
        Commands::Test { file, secure } => cmd_test(config, file, secure),
        Commands::Config { validate } => cmd_config(&config, validate),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config = match path {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load()?,
    };
    config.validate()?;
    Ok(config)
}

fn open_store(config: &Config) -> anyhow::Result<FaceStore<Box<dyn StoreBackend>>> {
    let backend = backend::open(&config.storage)?;
    Ok(FaceStore::new(backend))
}

/// Read a JSON array of float arrays
fn read_embeddings(path: &Path) -> anyhow::Result<Vec<Embedding>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let raw: Vec<Vec<f32>> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of embeddings", path.display()))?;

    if raw.is_empty() {
        anyhow::bail!("{} contains no embeddings", path.display());
    }
    if let Some(index) = raw.iter().position(|v| v.is_empty()) {
        anyhow::bail!("Embedding {} in {} is empty", index, path.display());
    }
    Ok(raw.into_iter().map(Array1::from).collect())
}

fn decode_token(token: &str) -> anyhow::Result<Vec<u8>> {
    URL_SAFE
        .decode(token.trim())
        .context("Token must be URL-safe base64")
}

fn cmd_add(
    config: &Config,
    name: String,
    file: Option<PathBuf>,
    encoded: Option<String>,
    token: String,
    replace: bool,
) -> anyhow::Result<()> {
    let vectors = match (file, encoded) {
        (Some(file), _) => read_embeddings(&file)?,
        (None, Some(encoded)) => codec::decode(&encoded)?,
        (None, None) => anyhow::bail!("Either --file or --encoded is required"),
    };
    let token = decode_token(&token)?;
    let count = vectors.len();

    let mut store = open_store(config)?;
    if !store.register(&name, vectors, &token, replace) {
        if !replace && store.contains(&name) {
            anyhow::bail!("{} is already registered (use --replace to overwrite)", name);
        }
        anyhow::bail!("Failed to register {}", name);
    }

    println!("✓ Registered {} with {} embedding(s)", name, count);
    Ok(())
}

fn cmd_extend(
    config: &Config,
    name: String,
    file: PathBuf,
    token: String,
    create: bool,
) -> anyhow::Result<()> {
    let vectors = read_embeddings(&file)?;
    let token = decode_token(&token)?;
    let count = vectors.len();

    let mut store = open_store(config)?;
    for vector in vectors {
        if !store.extend_registered(&name, vector, &token, create)? {
            if !store.contains(&name) {
                anyhow::bail!("{} is not registered (use --create to register it)", name);
            }
            anyhow::bail!("Failed to extend {}", name);
        }
    }

    let total = store.get_vectors(&name)?.len();
    println!(
        "✓ Added {} embedding(s) to {} ({} total)",
        count, name, total
    );
    Ok(())
}

fn cmd_remove(config: &Config, name: String) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    if !store.contains(&name) {
        anyhow::bail!("{} is not registered", name);
    }
    if !store.delete(&name) {
        anyhow::bail!("Failed to remove {}", name);
    }

    println!("✓ Removed {}", name);
    Ok(())
}

fn cmd_list(config: &Config) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let names = store.names();

    if names.is_empty() {
        println!("No faces registered");
        return Ok(());
    }

    println!("{:<30} {}", "Name", "Embeddings");
    println!("{}", "-".repeat(42));
    for name in names {
        match store.get_vectors(&name) {
            Ok(vectors) => println!("{:<30} {}", name, vectors.len()),
            Err(e) => println!("{:<30} unreadable ({})", name, e),
        }
    }

    Ok(())
}

fn cmd_export(config: &Config, name: String) -> anyhow::Result<()> {
    let mut store = open_store(config)?;
    let vectors = store.get_vectors(&name)?;
    println!("{}", codec::encode(vectors));
    Ok(())
}

fn cmd_test(mut config: Config, file: PathBuf, secure: bool) -> anyhow::Result<()> {
    if secure {
        config.matching.secure = true;
    }
    let thresholds = config.matching.thresholds();
    println!(
        "Matching with max distance {} ({} mode)",
        thresholds.max_distance,
        if config.matching.secure { "secure" } else { "normal" }
    );

    // Embeddings stand in for detected faces, one per entry
    let faces: Vec<ScannedFace> = read_embeddings(&file)?
        .into_iter()
        .map(|embedding| {
            let detection = DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 0.0,
                    height: 0.0,
                },
                confidence: 1.0,
            };
            ScannedFace::new(detection, embedding)
        })
        .collect();

    let mut store = open_store(&config)?;
    let matcher = EmbeddingMatcher::new(thresholds);
    let results = recognize::recognize(faces, &mut store, &matcher);

    println!();
    for (index, result) in results.iter().enumerate() {
        match &result.name {
            Some(name) => println!(
                "Face {}: {} (distance {:.4}, {} model(s), ratio {:.2})",
                index + 1,
                name,
                result.distance,
                result.model_count,
                result.model_ratio
            ),
            None => println!("Face {}: no match", index + 1),
        }
    }

    println!();
    match recognize::assess(&results) {
        Verdict::Authenticated { name } => println!("✅ Authenticated as {}", name),
        Verdict::NotRecognized => println!("❌ Not recognized"),
        Verdict::Obscured { faces } => println!("❌ {} faces in view, expected one", faces),
        Verdict::Insufficient => println!("❌ Lighting insufficient"),
        Verdict::NotDetected => println!("❌ No face"),
    }

    Ok(())
}

fn cmd_config(config: &Config, validate: bool) -> anyhow::Result<()> {
    if validate {
        config.validate()?;
        println!("✓ Configuration is valid");
        return Ok(());
    }

    println!("Configuration:");
    println!();

    println!("[detection]");
    println!("  min_confidence = {}", config.detection.min_confidence);
    println!();

    println!("[matching]");
    println!("  max_distance = {}", config.matching.max_distance);
    println!(
        "  secure_max_distance = {}",
        config.matching.secure_max_distance
    );
    println!("  secure = {}", config.matching.secure);
    println!("  min_match_count = {}", config.matching.min_match_count);
    println!("  min_model_ratio = {}", config.matching.min_model_ratio);
    println!();

    println!("[storage]");
    println!("  backend = {:?}", config.storage.backend);
    println!("  path = {:?}", config.storage.path);

    Ok(())
}
