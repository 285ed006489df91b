use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nlq_engine::db::{init_pool, MetadataRepository, PgRequestStore};
use nlq_engine::naming::BusinessNamer;
use nlq_engine::{
    AppConfig, Dialect, GuardOptions, InMemoryRequestStore, LlmClient, LlmProvider,
    MetadataSnapshot, PipelineComponents, PipelineSettings, QueryPipeline, RequestStore,
    SqlGuard, SqlxExecutor, StaticWorkspace, WorkspaceRateLimiter,
};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nlq")]
#[command(about = "Natural-language questions answered with guarded, read-only SQL")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and rewrite one SQL statement (read from stdin when --sql is omitted)
    Guard {
        /// Metadata snapshot JSON
        #[arg(short, long)]
        metadata: PathBuf,

        #[arg(short, long, default_value = "postgres")]
        dialect: Dialect,

        #[arg(long)]
        sql: Option<String>,

        /// Allow joins that do not follow declared foreign keys
        #[arg(long)]
        allow_free_joins: bool,
    },

    /// Ask a question against one workspace and print the stored result
    Ask {
        #[arg(short, long)]
        metadata: PathBuf,

        /// Connection config JSON with a `dialect` key
        #[arg(short, long)]
        connection: PathBuf,

        /// Owner of the workspace
        #[arg(short, long, default_value_t = 1)]
        user: i64,

        #[arg(short, long)]
        prompt: String,
    },

    /// Suggest business names for every table of a workspace
    NameTables {
        /// Snapshot file to rename in place; without it the workspace is read
        /// from and written back to DATABASE_URL
        #[arg(short, long)]
        metadata: Option<PathBuf>,

        #[arg(short, long)]
        workspace: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = AppConfig::from_env()?;

    match args.command {
        Command::Guard {
            metadata,
            dialect,
            sql,
            allow_free_joins,
        } => run_guard(&metadata, dialect, sql, allow_free_joins, &config),
        Command::Ask {
            metadata,
            connection,
            user,
            prompt,
        } => run_ask(&metadata, &connection, user, &prompt, &config).await,
        Command::NameTables {
            metadata,
            workspace,
        } => run_name_tables(metadata, workspace, &config).await,
    }
}

fn run_guard(
    metadata: &Path,
    dialect: Dialect,
    sql: Option<String>,
    allow_free_joins: bool,
    config: &AppConfig,
) -> Result<()> {
    let snapshot = MetadataSnapshot::load(metadata)?;
    let sql = match sql {
        Some(sql) => sql,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read SQL from stdin")?;
            buf
        }
    };

    let opts = GuardOptions {
        force_limit: config.force_limit,
        forbid_free_joins: !allow_free_joins,
        ..GuardOptions::for_dialect(dialect).with_allowed_schemas(snapshot.schemas())
    };
    match SqlGuard::new(&snapshot).validate_and_rewrite(&sql, &opts) {
        Ok(rewritten) => {
            println!("{}", rewritten);
            Ok(())
        }
        Err(violation) => bail!("SQL rejected: {}", violation),
    }
}

async fn run_ask(
    metadata: &Path,
    connection: &Path,
    user: i64,
    prompt: &str,
    config: &AppConfig,
) -> Result<()> {
    let workspace = Arc::new(StaticWorkspace::from_files(user, metadata, Some(connection))?);
    let workspace_id = workspace.workspace_id();

    let requests: Arc<dyn RequestStore> = match &config.database_url {
        Some(url) => {
            info!("Storing requests in PostgreSQL");
            Arc::new(PgRequestStore::new(init_pool(url).await?))
        }
        None => {
            warn!("DATABASE_URL not set, requests are kept in memory");
            Arc::new(InMemoryRequestStore::new())
        }
    };

    let components = PipelineComponents {
        workspaces: workspace.clone(),
        metadata: workspace.clone(),
        connections: workspace,
        requests,
        llm: Arc::new(LlmClient::new(config.llm.clone())?),
        executor: Arc::new(SqlxExecutor),
        limiter: Arc::new(WorkspaceRateLimiter::new(
            config.rate_limit_per_minute,
            Duration::from_secs(60),
        )),
    };
    let pipeline = QueryPipeline::new(components, PipelineSettings::from(config));

    match pipeline.create_and_execute(user, workspace_id, prompt).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            warn!("Request failed: {}", e);
            bail!("{}", e.user_message())
        }
    }
}

async fn run_name_tables(
    metadata: Option<PathBuf>,
    workspace: Option<i64>,
    config: &AppConfig,
) -> Result<()> {
    let llm: Arc<dyn LlmProvider> = Arc::new(LlmClient::new(config.llm.clone())?);
    let namer = BusinessNamer::new(llm);

    if let Some(path) = metadata {
        let mut snapshot = MetadataSnapshot::load(&path)?;
        let named = namer.name_tables(&mut snapshot).await;
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!("Named {} of {} table(s)", named, snapshot.tables.len());
        return Ok(());
    }

    let (Some(url), Some(workspace_id)) = (&config.database_url, workspace) else {
        bail!("Pass --metadata, or set DATABASE_URL and pass --workspace");
    };
    let repo = MetadataRepository::new(init_pool(url).await?);
    let mut snapshot = repo.load_snapshot(workspace_id).await?;
    let named = namer.name_tables(&mut snapshot).await;
    repo.save_business_names(&snapshot).await?;
    info!("Named {} of {} table(s)", named, snapshot.tables.len());
    Ok(())
}
