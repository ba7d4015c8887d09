//! Auto Deny Rules Agent
//!
//! Verifies which (environment, application, risky-service) combinations
//! show zero traffic over both a 24-hour and an 89-day window, then creates
//! deny rules for them in a freshly created rule set.
//!
//! # Usage
//! ```bash
//! auto-deny-rules --fqdn pce.example.com --org 123 \
//!     --api-user api_123 --api-secret 123456abcdef \
//!     --concurrency 2 --exclude-broadcast --exclude-multicast
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use auto_deny_rules::catalog::CatalogLoader;
use auto_deny_rules::orchestrator::{Orchestrator, DEFAULT_CONCURRENCY};
use auto_deny_rules::rules::RuleSynthesizer;
use auto_deny_rules::transport::{HttpTransport, Transport};
use auto_deny_rules::types::EnvApps;
use auto_deny_rules::verifier::{Exclusions, TrafficVerifier};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "auto-deny-rules")]
#[command(about = "Create deny rules for app/service pairs with no observed traffic", long_about = None)]
#[command(version)]
struct Cli {
    /// PCE hostname
    #[arg(long, env = "PCE_FQDN")]
    fqdn: String,

    /// PCE port
    #[arg(long, env = "PCE_PORT", default_value_t = 443)]
    port: u16,

    /// Organization identifier
    #[arg(long, env = "PCE_ORG")]
    org: String,

    /// API username
    #[arg(long, env = "PCE_API_USER")]
    api_user: String,

    /// API secret
    #[arg(long, env = "PCE_API_SECRET")]
    api_secret: String,

    /// Max traffic queries in flight at once
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Add broadcast transmission to destinations.exclude
    #[arg(long)]
    exclude_broadcast: bool,

    /// Add multicast transmission to destinations.exclude
    #[arg(long)]
    exclude_multicast: bool,

    /// Name of the ip-list used as the deny-rule consumer
    #[arg(long, default_value = "Any (0.0.0.0/0 and ::/0)")]
    target_ip_list: String,

    /// Show detailed logs (payloads, raw responses, etc.)
    #[arg(short, long)]
    verbose: bool,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("🚀 Auto deny rules agent starting...");

    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(&cli.fqdn, cli.port, &cli.api_user, &cli.api_secret)
            .context("Failed to create HTTP transport")?,
    );
    let catalog = CatalogLoader::new(Arc::clone(&transport), &cli.org);

    // catalog phase: any failure here is fatal, there is nothing to verify
    let envs = catalog
        .load_environments()
        .await
        .context("Failed to load environment labels")?;
    let services = catalog
        .load_risky_services()
        .await
        .context("Failed to load risky services")?;
    info!(
        "loaded {} environments and {} risky services",
        envs.len(),
        services.len()
    );

    let target = catalog
        .resolve_any_address_target(&cli.target_ip_list)
        .await
        .with_context(|| format!("Failed to locate ip-list {:?}", cli.target_ip_list))?;
    info!("using consumer ip-list {}", target.href);

    let synthesizer = RuleSynthesizer::new(Arc::clone(&transport), &cli.org);
    let rule_set_name = format!("Auto Deny Rules - {}", Local::now().format("%b %d, %Y %H:%M:%S"));
    let rule_set = synthesizer
        .create_rule_set(&rule_set_name)
        .await
        .context("Failed to create rule set")?;

    let mut env_apps = Vec::new();
    for env in envs {
        match catalog.load_app_set(&env).await {
            Ok(apps) if apps.is_empty() => {
                debug!("env {} has no eligible workloads, skipping", env.value);
            }
            Ok(apps) => env_apps.push(EnvApps { env, apps }),
            Err(e) => warn!("skipping env {}: {e}", env.value),
        }
    }

    let total = Orchestrator::total_queries(&env_apps, &services);
    if total == 0 {
        info!(
            "no traffic queries to run; rule set {} was left empty and may be deleted",
            rule_set.href
        );
        return Ok(());
    }
    info!(
        "running {total} traffic queries (concurrency {})",
        cli.concurrency
    );

    let exclusions = Exclusions {
        broadcast: cli.exclude_broadcast,
        multicast: cli.exclude_multicast,
    };
    let verifier = TrafficVerifier::new(Arc::clone(&transport), &cli.org, exclusions);
    let orchestrator = Orchestrator::new(verifier, cli.concurrency);
    let outcome = orchestrator.verify_all(&env_apps, &services).await;

    let total_findings = outcome.findings.len();
    let mut rules_created = 0usize;
    let mut rule_failures = 0usize;
    if total_findings > 0 {
        info!("creating {total_findings} deny rule(s)...");
    }
    for finding in &outcome.findings {
        match synthesizer.create_deny_rule(&rule_set, finding, &target).await {
            Ok(()) => {
                rules_created += 1;
                let percent = rules_created as f64 / total_findings as f64 * 100.0;
                info!(
                    "created deny rule for env {} service {} ({} apps) - {percent:.1}% ({rules_created}/{total_findings})",
                    finding.env.value,
                    finding.service.name,
                    finding.apps.len()
                );
            }
            Err(e) => {
                rule_failures += 1;
                error!("{e}");
            }
        }
    }

    info!(
        "✅ done: {} queries run, {} findings, {} deny rules created, {} query failures, {} rule failures",
        outcome.queries_run, total_findings, rules_created, outcome.failures, rule_failures
    );
    if total_findings == 0 {
        info!(
            "no deny rules needed; empty rule set {} may be deleted",
            rule_set.href
        );
    }

    Ok(())
}
