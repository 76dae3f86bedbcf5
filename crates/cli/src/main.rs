//! CLI for the Sentinel pre-signing transaction firewall.
//!
//! Pipeline: prefetch state -> resolve proxies -> static scan -> traced
//! baseline -> simulation battery -> features -> classifier -> drift ->
//! verdict.

use clap::{Parser, Subcommand};
use sentinel_analyzer::scan::{parse_request, scan, ScanContext, ScanOptions};
use sentinel_core::types::{ScanResponse, VerdictKind};
use sentinel_provider::{ChainRegistry, ClassifierClient, InMemoryHistory, RpcOracle};

#[derive(Parser, Debug)]
#[command(name = "sentinel", version, about = "Pre-signing firewall for EVM transactions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze a candidate transaction before it is signed.
    Scan {
        /// Sender address (0x-prefixed hex).
        #[arg(long)]
        from: String,

        /// Target contract address (0x-prefixed hex).
        #[arg(long)]
        to: String,

        /// Call data, hex. Empty for a plain transfer.
        #[arg(long, default_value = "0x")]
        data: String,

        /// Value in wei, decimal or 0x-hex.
        #[arg(long, default_value = "0")]
        value: String,

        /// Chain: an integer id or "eip155:<n>".
        #[arg(long, default_value = "1")]
        chain: String,

        /// Premium RPC endpoint tried before public fallbacks.
        #[arg(long, env = "SENTINEL_RPC_URL")]
        rpc_url: Option<String>,

        /// Classifier oracle analyze URL; ML scoring is skipped if unset.
        #[arg(long, env = "SENTINEL_CLASSIFIER_URL")]
        classifier_url: Option<String>,

        /// Preload 100 storage slots instead of 20.
        #[arg(long, default_value_t = false)]
        deep: bool,

        /// Emit the full response envelope as pretty JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scan {
            from,
            to,
            data,
            value,
            chain,
            rpc_url,
            classifier_url,
            deep,
            json,
        } => {
            let request = parse_request(&from, &to, &data, &value, &chain)?;

            let mut registry = ChainRegistry::from_env();
            if let Some(url) = rpc_url {
                registry.set_premium(request.chain_id, url);
            }

            let oracle = RpcOracle::new(registry);
            let history = InMemoryHistory::new();
            let classifier = classifier_url.map(ClassifierClient::new);

            let ctx = ScanContext {
                oracle: &oracle,
                history: Some(&history),
                classifier: classifier.as_ref(),
            };
            let options = ScanOptions {
                deep,
                ..ScanOptions::default()
            };

            tracing::info!(to = %request.to, chain = request.chain_id, deep, "starting scan");
            let response = scan(&ctx, &request, &options).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print!("{}", render(&response));
            }

            if response.final_verdict.verdict == VerdictKind::Block {
                std::process::exit(2);
            }
        }
    }

    Ok(())
}

/// Compact human-readable rendering of the response envelope.
fn render(response: &ScanResponse) -> String {
    let verdict = &response.final_verdict;
    let report = &response.security_report;

    let mut out = String::new();
    out.push_str(&format!(
        "\nVerdict: {:?}  (confidence {}, source {:?})\n",
        verdict.verdict, verdict.confidence, verdict.source
    ));
    out.push_str(&format!("Reason:  {}\n", verdict.reason));
    out.push_str(&format!(
        "Risk:    {}/100  honeypot={}  ownership={:?}\n",
        report.risk_score, report.is_honeypot, report.ownership_status
    ));

    if response.proxy_info.is_proxy {
        out.push_str(&format!(
            "Proxy:   {:?} -> {}\n",
            response.proxy_info.kind,
            response
                .proxy_info
                .implementation
                .map(|a| format!("{a:#x}"))
                .unwrap_or_else(|| "unresolved".to_string()),
        ));
    }

    if !report.flags.is_empty() {
        out.push_str("Flags:\n");
        for flag in &report.flags {
            out.push_str(&format!("  - {flag}\n"));
        }
    }

    if let Some(drift) = &response.drift_analysis {
        out.push_str(&format!(
            "Drift:   has_drift={}  risk_delta={:+}\n",
            drift.has_drift, drift.risk_delta
        ));
    }

    if let Some(ml) = &response.ml_analysis {
        out.push_str(&format!(
            "ML:      p={:.3}  uncertainty={:.3}  model={}\n",
            ml.scam_probability, ml.uncertainty, ml.model_version
        ));
    }

    out.push_str(&format!(
        "Story:   {} — {}\n",
        report.mechanism_story.title, report.mechanism_story.story
    ));
    out
}
