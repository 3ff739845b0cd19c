use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quiz_locale_sync::auditor::{AuditChecks, AuditScope, ConsistencyAuditor, CorrectiveOperation};
use quiz_locale_sync::config::Config;
use quiz_locale_sync::locale::LocaleCode;
use quiz_locale_sync::provider::DeepLProvider;
use quiz_locale_sync::quota::QuotaGuard;
use quiz_locale_sync::runner::{PipelineRunner, RunSettings};
use quiz_locale_sync::store::RestStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Translate missing variants and link them to their source records
    Sync {
        /// Source locale (defaults to SOURCE_LOCALE)
        #[arg(long)]
        source: Option<LocaleCode>,

        /// Target locale; repeatable (defaults to TARGET_LOCALES)
        #[arg(long = "target")]
        targets: Vec<LocaleCode>,

        /// Also write the report to this file
        #[arg(long)]
        report_json: Option<PathBuf>,
    },

    /// Read-only consistency checks
    Audit {
        /// Locale to audit; repeatable (defaults to TARGET_LOCALES)
        #[arg(long = "locale")]
        locales: Vec<LocaleCode>,

        /// Verify linkage for at most N variants per locale
        #[arg(long)]
        sample: Option<usize>,

        #[arg(long)]
        skip_counts: bool,

        #[arg(long)]
        skip_linkage: bool,

        #[arg(long)]
        skip_duplicates: bool,
    },

    /// Show how one business key is linked across locales
    Verify { base_id: String },

    /// Delete variants whose link matches no source record
    DeleteOrphans {
        locale: LocaleCode,
        /// Token printed by the dry run
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Delete every record in a locale
    PurgeLocale {
        locale: LocaleCode,
        #[arg(long)]
        confirm: Option<String>,
    },

    /// Re-attach unlinked variants to their source records
    Relink {
        locale: LocaleCode,
        #[arg(long)]
        confirm: Option<String>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production/CI)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("quiz_locale_sync=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let store = Arc::new(RestStore::from_config(&config).context("Failed to build store client")?);

    match args.command {
        Command::Sync {
            source,
            targets,
            report_json,
        } => {
            let source = source.unwrap_or_else(|| config.source_locale.clone());
            let targets = if targets.is_empty() {
                config.target_locales.clone()
            } else {
                targets
            };
            if targets.is_empty() {
                anyhow::bail!("No target locales: pass --target or set TARGET_LOCALES");
            }

            let provider = Arc::new(
                DeepLProvider::from_config(&config)
                    .context("Failed to build translation client")?,
            );

            let (cancel_tx, cancel_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current batch");
                    let _ = cancel_tx.send(true);
                }
            });

            let runner = PipelineRunner::new(store, provider.clone(), RunSettings::from(&config))
                .with_guard(QuotaGuard::new(provider).with_reserve(config.quota_reserve_chars))
                .with_cancellation(cancel_rx);
            let report = runner.run_sync(&source, &targets).await;

            if let Some(path) = report_json {
                report
                    .write_json(&path)
                    .with_context(|| format!("Failed to write report to {}", path.display()))?;
                info!("Report written to {}", path.display());
            }
            print_json(&report)?;

            if report.is_aborted() {
                std::process::exit(1);
            }
        }

        Command::Audit {
            locales,
            sample,
            skip_counts,
            skip_linkage,
            skip_duplicates,
        } => {
            let locales = if locales.is_empty() {
                config.target_locales.clone()
            } else {
                locales
            };
            let mut scope = AuditScope::new(locales).with_checks(AuditChecks {
                count_parity: !skip_counts,
                linkage: !skip_linkage,
                duplicates: !skip_duplicates,
            });
            if let Some(sample) = sample {
                scope = scope.with_sample(sample);
            }

            let report = auditor(store, &config).audit(&scope).await?;
            print_json(&report)?;
        }

        Command::Verify { base_id } => {
            let status = auditor(store, &config).verify(&base_id).await?;
            print_json(&status)?;
        }

        Command::DeleteOrphans { locale, confirm } => {
            corrective(store, &config, CorrectiveOperation::DeleteOrphans, &locale, confirm).await?;
        }

        Command::PurgeLocale { locale, confirm } => {
            corrective(store, &config, CorrectiveOperation::PurgeLocale, &locale, confirm).await?;
        }

        Command::Relink { locale, confirm } => {
            corrective(store, &config, CorrectiveOperation::Relink, &locale, confirm).await?;
        }
    }

    Ok(())
}

fn auditor(store: Arc<RestStore>, config: &Config) -> ConsistencyAuditor<RestStore> {
    ConsistencyAuditor::new(store, config.source_locale.clone()).with_page_size(config.store_page_size)
}

/// Without a token, print the dry-run plan. With one, execute.
async fn corrective(
    store: Arc<RestStore>,
    config: &Config,
    operation: CorrectiveOperation,
    locale: &LocaleCode,
    confirm: Option<String>,
) -> Result<()> {
    let auditor = auditor(store, config);

    match confirm {
        None => {
            let plan = auditor.plan(operation, locale).await?;
            info!(
                "Dry run: {} would affect {} records in {}. Re-run with --confirm {}",
                operation,
                plan.record_ids.len(),
                locale,
                plan.token
            );
            print_json(&plan)
        }
        Some(token) => {
            let outcome = auditor.execute(operation, locale, &token).await?;
            print_json(&outcome)?;
            if !outcome.is_complete() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}
