use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "edi-report",
    version,
    about = "Pull numeric answers out of development-review PDFs into spreadsheets"
)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a directory of project folders, one folder, or a single PDF
    Run(RunArgs),
    /// Serve the pipeline over HTTP
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    pub path: PathBuf,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:3000")]
    pub bind: SocketAddr,

    #[command(flatten)]
    pub config: ConfigArgs,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ProviderArg {
    Openai,
    Ollama,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedderArg {
    Openai,
    Ollama,
    Hash,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum BackendArg {
    Memory,
    Qdrant,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum FormatArg {
    Xlsx,
    Csv,
}

/// Settings shared by `run` and `serve`. Flags win over environment variables.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "OPENAI_BASE_URL")]
    pub openai_url: Option<String>,

    #[arg(long, env = "EDI_LLM_PROVIDER", value_enum)]
    pub llm_provider: Option<ProviderArg>,

    #[arg(long, env = "EDI_LLM_MODEL")]
    pub llm_model: Option<String>,

    #[arg(long)]
    pub temperature: Option<f32>,

    #[arg(long, env = "EDI_EMBEDDING_PROVIDER", value_enum)]
    pub embedding_provider: Option<EmbedderArg>,

    #[arg(long, env = "EDI_EMBEDDING_MODEL")]
    pub embedding_model: Option<String>,

    #[arg(long, env = "EDI_OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Chunks placed in the context of each question
    #[arg(long, env = "EDI_TOP_K")]
    pub top_k: Option<usize>,

    #[arg(long)]
    pub chunk_size: Option<usize>,

    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    #[arg(long, value_enum)]
    pub index: Option<BackendArg>,

    #[arg(long, env = "EDI_QDRANT_URL")]
    pub qdrant_url: Option<String>,

    /// Retries for transient service failures; 0 disables retrying
    #[arg(long)]
    pub max_retries: Option<usize>,

    /// Question catalog JSON file replacing the built-in questions
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Where spreadsheets are written (default: next to each processed folder)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub format: Option<FormatArg>,

    /// Also write `<name>.answers.json` with every question and response
    #[arg(long, default_value_t = false)]
    pub answers_log: bool,

    /// Treat every folder below the path that holds PDFs as a project
    #[arg(long, default_value_t = false)]
    pub recursive: bool,

    /// Stop the whole batch on an authentication or quota failure
    #[arg(long, default_value_t = false)]
    pub stop_on_fatal: bool,
}
