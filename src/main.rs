mod category;
mod discovery;
mod errors;
mod logging;
mod payload;
mod prune;
mod schema;
mod upload;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser};
use tracing::info;

use crate::category::{
    UploadSession, populate_run_automation_details, validate_unique_category,
};
use crate::discovery::{discover_result_files, resolve_result_file};
use crate::errors::UploadError;
use crate::logging::init_logging;
use crate::payload::{
    ApiTarget, PullRequestBase, PullRequestEvent, build_payload, encode_result_set,
    resolve_pull_request_base, tool_names,
};
use crate::prune::prune_invalid_results;
use crate::schema::validate_result_file;
use crate::upload::{ApiConnection, Uploader};

const TOKEN_ENV: &str = "SARIF_RELAY_TOKEN";

/// CLI arguments for sarif-relay execution.
#[derive(Parser, Debug)]
#[command(
    name = "sarif-relay",
    about = "Validates, prunes, categorizes and uploads SARIF result sets to a code-scanning endpoint.",
    version
)]
struct Cli {
    #[command(flatten)]
    upload: UploadArgs,
}

/// Options for one upload session.
#[derive(Args, Debug, Clone)]
struct UploadArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "SARIF file, or directory scanned recursively for .sarif files."
    )]
    sarif: PathBuf,
    #[arg(long, value_name = "SHA", help = "Commit the analysis ran against.")]
    commit: String,
    #[arg(
        long = "ref",
        value_name = "REF",
        help = "Fully qualified git ref that was analyzed (e.g. refs/heads/main or refs/pull/42/merge)."
    )]
    git_ref: String,
    #[arg(
        long,
        value_name = "KEY",
        help = "Identifier of the workflow and job that produced the analysis."
    )]
    analysis_key: String,
    #[arg(long, value_name = "NAME")]
    analysis_name: Option<String>,
    #[arg(
        long,
        value_name = "CATEGORY",
        help = "Category override; keeps unrelated analyses from overwriting each other."
    )]
    category: Option<String>,
    #[arg(
        long,
        value_name = "JSON",
        help = "JSON-encoded key/value description of the analysis environment (e.g. a build matrix entry)."
    )]
    environment: Option<String>,
    #[arg(long, value_name = "PATH", default_value = ".")]
    checkout_path: PathBuf,
    #[arg(long, value_name = "URL", help = "Results-ingestion endpoint URL.")]
    endpoint: String,
    #[arg(
        long,
        value_name = "TOKEN",
        help = "Upload token. Falls back to the SARIF_RELAY_TOKEN environment variable."
    )]
    token: Option<String>,
    #[arg(
        long,
        value_name = "VERSION",
        help = "Enterprise endpoint version. When omitted the hosted endpoint is assumed."
    )]
    ghes_version: Option<String>,
    #[arg(long, value_name = "NAME", help = "CI event that triggered the run.")]
    event_name: Option<String>,
    #[arg(
        long,
        value_name = "PATH",
        help = "Path to the JSON event metadata written by the CI runner."
    )]
    event_path: Option<PathBuf>,
    #[arg(
        long,
        value_name = "SHA",
        help = "Merge-base between the pull request head and base branches."
    )]
    merge_base: Option<String>,
    #[arg(long, value_name = "ID")]
    workflow_run_id: Option<i64>,
    #[arg(long, help = "Print the assembled payloads instead of uploading.")]
    dry_run: bool,
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            std::process::ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging();
    let args = cli.upload;
    let files = resolve_inputs(&args.sarif)?;
    if files.is_empty() {
        anyhow::bail!("no result files found under {}", args.sarif.display());
    }

    let target = match &args.ghes_version {
        Some(version) => ApiTarget::Enterprise {
            version: version.clone(),
        },
        None => ApiTarget::Hosted,
    };
    let pull_request = resolve_pull_request(&args)?;
    let checkout_uri = checkout_uri(&args.checkout_path)?;
    let analysis_name = args
        .analysis_name
        .clone()
        .unwrap_or_else(|| args.analysis_key.clone());
    let environment = args.environment.clone().unwrap_or_else(|| "null".to_string());
    let uploader = if args.dry_run {
        None
    } else {
        Some(Uploader::new(ApiConnection {
            endpoint: args.endpoint.clone(),
            token: resolve_token(&args)?,
        })?)
    };

    let mut session = UploadSession::new();
    for file in &files {
        let sarif = validate_result_file(file)?;
        let sarif = prune_invalid_results(&sarif);
        let sarif = populate_run_automation_details(
            &sarif,
            args.category.as_deref(),
            &args.analysis_key,
            args.environment.as_deref(),
        )?;
        validate_unique_category(&mut session, &sarif)?;

        let tools = tool_names(&sarif);
        let encoded = encode_result_set(&sarif)?;
        let payload = build_payload(
            &args.commit,
            &args.git_ref,
            &args.analysis_key,
            &analysis_name,
            encoded,
            &checkout_uri,
            &environment,
            tools,
            args.workflow_run_id,
            &target,
            pull_request.as_ref(),
        );
        match &uploader {
            Some(uploader) => {
                let id = uploader.upload(&payload)?;
                info!("accepted {} as upload {id}", file.display());
            }
            None => {
                let mut stdout = io::stdout();
                serde_json::to_writer_pretty(&mut stdout, &payload)
                    .context("failed to serialize payload")?;
                stdout
                    .write_all(b"\n")
                    .context("failed to write payload")?;
            }
        }
    }
    Ok(())
}

fn resolve_inputs(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_dir() {
        discover_result_files(path)
    } else {
        Ok(vec![resolve_result_file(path)?])
    }
}

fn resolve_pull_request(args: &UploadArgs) -> Result<Option<PullRequestBase>> {
    if args.event_name.as_deref() != Some("pull_request") {
        return Ok(None);
    }
    let Some(event_path) = args.event_path.as_deref() else {
        return Ok(None);
    };
    let content = fs::read_to_string(event_path).map_err(|source| UploadError::Io {
        path: event_path.to_path_buf(),
        source,
    })?;
    let event: PullRequestEvent =
        serde_json::from_str(&content).context("parse pull request event metadata")?;
    Ok(resolve_pull_request_base(
        &event,
        &args.git_ref,
        args.merge_base.as_deref(),
    ))
}

fn resolve_token(args: &UploadArgs) -> Result<String> {
    if let Some(token) = &args.token {
        return Ok(token.clone());
    }
    std::env::var(TOKEN_ENV)
        .with_context(|| format!("missing upload token: pass --token or set {TOKEN_ENV}"))
}

fn checkout_uri(path: &Path) -> Result<String> {
    let absolute = std::path::absolute(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    let url = reqwest::Url::from_file_path(&absolute)
        .map_err(|()| anyhow!("cannot express {} as a file URI", absolute.display()))?;
    Ok(url.to_string())
}
