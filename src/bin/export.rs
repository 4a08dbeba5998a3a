//! `docbulk-export` — thin CLI shim resolving one extraction template
//! against a job's persisted fields and writing an Excel/CSV export.
//!
//! Grounded the same way as `bin/ingest.rs`: a clap-derived `Cli`, an
//! `anyhow`-wrapped `main`, `tracing_subscriber` logging — the teacher's
//! `bin/pdf2md.rs` texture applied to a different verb.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use docbulk_engine::export::{self, ExportFormat, ExportRequest};
use docbulk_engine::store::{build_pool, DocumentStore, FieldsStore, PostgresDocumentStore, PostgresFieldsStore, PostgresTemplateStore, TemplateStore};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Export a job's extracted fields against a template into Excel or CSV.
#[derive(Parser, Debug)]
#[command(
    name = "docbulk-export",
    version,
    about = "Template-driven export of bulk-extracted fields to xlsx/csv",
    arg_required_else_help = true
)]
struct Cli {
    /// Job whose completed documents should be exported.
    job_id: Uuid,

    /// Template id to map columns against.
    #[arg(long)]
    template_id: Uuid,

    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Output file path; extension is not inspected, `--format` decides.
    #[arg(short, long)]
    output: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "xlsx")]
    format: FormatArg,

    /// Explicit document ids to export instead of every completed document
    /// in the job.
    #[arg(long, value_delimiter = ',')]
    document_ids: Vec<Uuid>,

    /// Max connections in the Postgres pool.
    #[arg(long, default_value_t = 5)]
    db_pool_max_size: usize,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Xlsx,
    Csv,
}

impl From<FormatArg> for ExportFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Xlsx => ExportFormat::Xlsx,
            FormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let pool = build_pool(&cli.database_url, cli.db_pool_max_size).context("failed to build Postgres pool")?;
    let document_store = PostgresDocumentStore::new(pool.clone());
    let fields_store = PostgresFieldsStore::new(pool.clone());
    let template_store = PostgresTemplateStore::new(pool);

    let template = template_store
        .get(cli.template_id)
        .await
        .context("failed to load template")?
        .with_context(|| format!("template {} not found", cli.template_id))?;

    let document_ids = if cli.document_ids.is_empty() {
        document_store.documents_for_export(cli.job_id).await.context("failed to resolve export targets")?
    } else {
        cli.document_ids.clone()
    };

    if document_ids.is_empty() {
        anyhow::bail!("no completed documents found for job {}", cli.job_id);
    }

    let all_fields = fields_store.fields_for_documents(&document_ids).await.context("failed to load fields")?;

    let mut fields_by_document: std::collections::BTreeMap<Uuid, Vec<docbulk_engine::model::ExtractedField>> =
        std::collections::BTreeMap::new();
    for field in all_fields {
        fields_by_document.entry(field.document_id).or_default().push(field);
    }

    // Resolve template columns against the first target document's fields;
    // sibling documents are expected to share the same field-name shape
    // (spec §4.9 step 3: "mapping is resolved once per template, applied to
    // every target document").
    let reference_fields: Vec<docbulk_engine::model::ExtractedField> = fields_by_document
        .values()
        .next()
        .cloned()
        .with_context(|| format!("no fields found for job {}'s target documents", cli.job_id))?;

    let mappings =
        docbulk_engine::mapping::resolve_mappings(&template, &reference_fields, None, None, &cli.job_id.to_string())
            .await;

    let request = ExportRequest { job_id: cli.job_id, columns: &template.columns, mappings: &mappings, format: cli.format.into() };

    let bytes = export::export(&request, &fields_by_document).context("export failed")?;
    tokio::fs::write(&cli.output, &bytes).await.with_context(|| format!("failed to write {}", cli.output.display()))?;

    eprintln!(
        "exported {} document(s), {} column(s) -> {}",
        fields_by_document.len(),
        template.columns.len(),
        cli.output.display()
    );

    Ok(())
}
