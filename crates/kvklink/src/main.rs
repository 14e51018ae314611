mod commands;
mod config;
mod error;
mod trace;

#[cfg(test)]
mod tests;

use std::{
  fs::File,
  io::{self, BufReader, BufWriter},
  path::PathBuf,
  sync::Arc,
};

use clap::{Parser, Subcommand};
use libkvklink::prelude::*;
use rustls::crypto::aws_lc_rs;
use tokio::signal;

use crate::{
  commands::Recognizer,
  config::{Config, load_params},
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "kvklink", version, about = "Links company mentions in news articles to KvK registry numbers")]
struct Cli {
  /// Linking parameters, as a JSON object.
  #[arg(long, env = "KVKLINK_PARAMS", global = true)]
  params: Option<PathBuf>,
  /// Knowledge base snapshot to read and write.
  #[arg(long, env = "KVKLINK_SNAPSHOT", global = true, default_value = "kvklink.json")]
  snapshot: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Builds the snapshot from a tab-separated registry export.
  Index { registry: PathBuf },
  /// Registers every unknown company mention of a document set as an alias
  /// with uniform priors.
  Seed {
    /// Documents, one JSON object per line.
    documents: PathBuf,
    #[arg(long, env = "KVKLINK_NER_URL")]
    ner_url: Option<String>,
  },
  /// Re-estimates alias priors from a tab-separated annotation export.
  Priors { observations: PathBuf },
  /// Links the company mentions of a document set.
  Link {
    /// Documents, one JSON object per line.
    documents: PathBuf,
    /// Where to write the links; defaults to standard output.
    #[arg(long, short)]
    output: Option<PathBuf>,
    #[arg(long, env = "KVKLINK_NER_URL")]
    ner_url: Option<String>,
    /// Word vectors used to pick between candidates by context.
    #[arg(long, env = "KVKLINK_VECTORS")]
    vectors: Option<PathBuf>,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let _ = aws_lc_rs::default_provider().install_default();

  let cli = Cli::parse();
  let config = Config::from_env()?;
  let _guard = trace::init_tracing(&config, io::stderr());

  if let Some(addr) = config.metrics_addr {
    trace::install_prometheus(addr)?;
  }

  libkvklink::init();

  interruptible(run(cli), shutdown()).await
}

async fn interruptible(work: impl Future<Output = anyhow::Result<()>>, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
  tokio::select! {
    result = work => result,
    () = shutdown => anyhow::bail!("interrupted before the batch completed"),
  }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
  let params = load_params(cli.params.as_deref())?;

  match cli.command {
    Command::Index { registry } => {
      let kb = commands::index(File::open(&registry)?, params)?;

      commands::save_knowledge_base(&kb, &cli.snapshot)?;

      tracing::info!(snapshot = %cli.snapshot.display(), entities = kb.registry().len(), "wrote knowledge base snapshot");
    }

    Command::Seed { documents, ner_url } => {
      let kb = Arc::new(commands::open_knowledge_base(&cli.snapshot, params)?);
      let linker = Linker::builder(kb.clone()).build()?;
      let seeded = commands::seed(&linker, &Recognizer::new(ner_url), BufReader::new(File::open(&documents)?)).await?;

      commands::save_knowledge_base(&kb, &cli.snapshot)?;

      tracing::info!(seeded, "wrote knowledge base snapshot");
    }

    Command::Priors { observations } => {
      let kb = commands::open_knowledge_base(&cli.snapshot, params)?;

      commands::priors(&kb, File::open(&observations)?)?;
      commands::save_knowledge_base(&kb, &cli.snapshot)?;
    }

    Command::Link { documents, output, ner_url, vectors } => {
      let kb = Arc::new(commands::open_knowledge_base(&cli.snapshot, params)?);

      let embedder = match vectors {
        Some(path) => Some(Arc::new(WordVectors::from_path(path)?) as Arc<dyn Embedder>),
        None => None,
      };

      let linker = Linker::builder(kb).maybe_embedder(embedder).build()?;
      let recognizer = Recognizer::new(ner_url);
      let documents = BufReader::new(File::open(&documents)?);

      let report = match output {
        Some(path) => commands::link(&linker, &recognizer, documents, BufWriter::new(File::create(path)?)).await?,
        None => commands::link(&linker, &recognizer, documents, io::stdout().lock()).await?,
      };

      eprintln!("{report}");
    }
  }

  Ok(())
}

async fn shutdown() {
  let ctrl_c = async {
    signal::ctrl_c().await.expect("failed to install ^C handler");
  };

  let terminate = async {
    signal::unix::signal(signal::unix::SignalKind::terminate())
      .expect("failed to install terminate signal handler")
      .recv()
      .await;
  };

  tokio::select! {
      () = ctrl_c => tracing::info!("received ^C, stopping"),
      () = terminate => tracing::info!("received terminate signal, stopping"),
  }
}
