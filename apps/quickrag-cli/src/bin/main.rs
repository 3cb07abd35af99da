use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use quickrag_core::clock::system_clock;
use quickrag_core::config::{Config, Settings};
use quickrag_core::types::{DocumentChunk, FusionMethod, Meta};
use quickrag_hybrid::{AccessLog, CacheWarmer, Engine, HotQuery};

const INGEST_BATCH: usize = 256;
const DATA_DIR: &str = "quickrag_data";
const HOT_QUERIES_FILE: &str = "hot_queries.json";
const HOT_WARM_LIMIT: usize = 50;

const USAGE: &str = "Usage: quickrag <command> [args...]

Commands:
  ingest <dir>                                   index every *.jsonl chunk file under <dir>
  query \"<text>\" [--top-k N] [--fusion rrf|weighted]
  delete <doc_id>...                             remove documents from both indexes
  clear                                          empty both indexes
  status                                         readiness, cache and health report
  warm [file]                                    prefetch one query per line, or the most asked queries";

/// One line of an ingest file. Only `doc_id` and `content` are required.
#[derive(Debug, Deserialize)]
struct ChunkRecord {
    doc_id: String,
    chunk_id: Option<String>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    title: String,
    content: String,
    #[serde(default)]
    chunk_index: usize,
    #[serde(default)]
    metadata: Meta,
}

impl ChunkRecord {
    fn into_chunk(self) -> DocumentChunk {
        let chunk_id = self.chunk_id.unwrap_or_else(|| format!("{}:{}", self.doc_id, self.chunk_index));
        let mut chunk = DocumentChunk::new(self.doc_id, chunk_id, self.source, self.title, self.content, self.chunk_index);
        chunk.metadata = self.metadata;
        chunk
    }
}

fn parse_args() -> (String, Vec<String>) {
    let mut args: Vec<String> = env::args().collect();
    args.remove(0);
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(1);
    }
    let cmd = args.remove(0);
    (cmd, args)
}

fn usage_error(msg: &str) -> ! {
    eprintln!("{msg}\n\n{USAGE}");
    std::process::exit(1)
}

/// A CLI run is one process per command, so both indexes need a home on
/// disk unless the configuration already names one.
fn with_local_defaults(mut settings: Settings) -> Settings {
    if settings.bm25.snapshot_path.is_none() {
        settings.bm25.snapshot_path = Some(format!("{DATA_DIR}/sparse_snapshot.json"));
    }
    if settings.vector.uri.is_none() {
        settings.vector.uri = Some(format!("{DATA_DIR}/lancedb"));
    }
    settings
}

fn hot_queries_path() -> PathBuf {
    Path::new(DATA_DIR).join(HOT_QUERIES_FILE)
}

/// Missing or unreadable history starts the log empty.
fn load_access_log(log: &AccessLog, path: &Path) {
    let Ok(raw) = fs::read_to_string(path) else { return };
    match serde_json::from_str::<Vec<HotQuery>>(&raw) {
        Ok(saved) => log.restore(saved),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable query history"),
    }
}

fn save_access_log(log: &AccessLog, path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string(&log.snapshot())?)?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::load().map_err(|e| {
        eprintln!("Error loading config: {e}");
        e
    })?;
    let settings = with_local_defaults(config.settings()?);
    let (cmd, args) = parse_args();
    tokio::runtime::Runtime::new()?.block_on(run(settings, &cmd, &args))
}

async fn run(settings: Settings, cmd: &str, args: &[String]) -> anyhow::Result<()> {
    match cmd {
        "ingest" => {
            let dir = args.first().map(PathBuf::from).unwrap_or_else(|| usage_error("ingest needs a directory"));
            let engine = Engine::from_settings(settings, system_clock()).await?;
            let indexed = ingest(&engine, &dir).await?;
            println!("✅ Ingest complete ({indexed} chunks from {})", dir.display());
        }
        "query" => {
            let (text, top_k, method) = parse_query_args(args)?;
            let engine = Engine::from_settings(settings, system_clock()).await?;
            let history = hot_queries_path();
            load_access_log(engine.retriever.access_log(), &history);
            let top_k = top_k.unwrap_or_else(|| engine.retriever.default_top_k());
            let method = method.unwrap_or_else(|| engine.retriever.default_method());
            let result = engine.retriever.retrieve(&text, top_k, method).await?;
            if let Err(e) = save_access_log(engine.retriever.access_log(), &history) {
                tracing::warn!(error = %e, "query history not saved");
            }
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        "delete" => {
            if args.is_empty() {
                usage_error("delete needs at least one doc_id");
            }
            let engine = Engine::from_settings(settings, system_clock()).await?;
            engine.retriever.delete_documents(args).await?;
            println!("🗑️  Deleted {} document(s)", args.len());
        }
        "clear" => {
            let engine = Engine::from_settings(settings, system_clock()).await?;
            engine.retriever.clear().await?;
            println!("🧹 Both indexes cleared");
        }
        "status" => {
            let engine = Engine::from_settings(settings, system_clock()).await?;
            let report = serde_json::json!({
                "retriever": engine.retriever.status().await,
                "cache": engine.cache.stats(),
                "shared_cache": engine.cache.remote_health().await,
                "health": engine.monitor.health_score(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        "warm" => {
            let engine = Engine::from_settings(settings, system_clock()).await?;
            let warmer = CacheWarmer::new(engine.retriever.clone());
            let report = match args.first() {
                Some(file) => warmer.warm(&read_query_file(Path::new(file))?).await,
                None => {
                    load_access_log(engine.retriever.access_log(), &hot_queries_path());
                    warmer.warm_hot(HOT_WARM_LIMIT).await
                }
            };
            println!("🔥 {}", serde_json::to_string_pretty(&report)?);
        }
        "help" | "--help" | "-h" => println!("{USAGE}"),
        other => usage_error(&format!("Unknown command: {other}")),
    }
    Ok(())
}

fn parse_query_args(args: &[String]) -> anyhow::Result<(String, Option<usize>, Option<FusionMethod>)> {
    let mut text = None;
    let mut top_k = None;
    let mut method = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--top-k" => {
                let raw = iter.next().unwrap_or_else(|| usage_error("--top-k needs a value"));
                top_k = Some(raw.parse::<usize>().map_err(|e| anyhow::anyhow!("invalid --top-k {raw:?}: {e}"))?);
            }
            "--fusion" => {
                let raw = iter.next().unwrap_or_else(|| usage_error("--fusion needs a value"));
                method = Some(FusionMethod::from_str(raw)?);
            }
            _ if text.is_none() => text = Some(arg.clone()),
            _ => usage_error(&format!("unexpected argument: {arg}")),
        }
    }
    let text = text.unwrap_or_else(|| usage_error("query needs text"));
    Ok((text, top_k, method))
}

fn read_query_file(path: &Path) -> anyhow::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

fn chunk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "jsonl"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

async fn ingest(engine: &Engine, dir: &Path) -> anyhow::Result<usize> {
    let files = chunk_files(dir);
    if files.is_empty() {
        println!("No *.jsonl files under {}", dir.display());
        return Ok(0);
    }

    let pb = ProgressBar::new(files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}")?
            .progress_chars("#>-"),
    );

    let mut batch = Vec::with_capacity(INGEST_BATCH);
    let mut indexed = 0;
    let mut skipped = 0;
    for file in &files {
        pb.set_message(file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        for (lineno, line) in fs::read_to_string(file)?.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ChunkRecord>(line) {
                Ok(record) => batch.push(record.into_chunk()),
                Err(e) => {
                    tracing::warn!(file = %file.display(), line = lineno + 1, error = %e, "skipping malformed chunk");
                    skipped += 1;
                }
            }
            if batch.len() == INGEST_BATCH {
                engine.retriever.add_documents(&batch).await?;
                indexed += batch.len();
                batch.clear();
            }
        }
        pb.inc(1);
    }
    if !batch.is_empty() {
        engine.retriever.add_documents(&batch).await?;
        indexed += batch.len();
    }
    pb.finish_with_message(format!("{indexed} chunks, {skipped} skipped"));
    Ok(indexed)
}
