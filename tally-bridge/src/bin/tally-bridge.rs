//! Command-line front end for the Tally bridge client

use anyhow::{anyhow, bail, Context};
use serde::Serialize;
use tally_bridge::query::normalize_date;
use tally_bridge::{BridgeClient, Config, FiscalMonth};
use tracing::info;

const USAGE: &str = "usage: tally-bridge <command>

commands:
  connect <CODE>              verify the session code and remember it
  status                      show the remembered session
  trial-balance <FROM> <TO>   trial balance as of TO
  month-wise <FY> <MONTH>     month-end balances April..MONTH of FY
  gst                         Regular ledgers missing a GSTIN
  disconnect                  forget the remembered session";

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn require_session(client: &BridgeClient) -> anyhow::Result<()> {
    if !client.restore().await {
        bail!("No live Tally session; run `tally-bridge connect <CODE>` first");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    // Load configuration
    let config = match std::env::var("TALLY_BRIDGE_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        Err(_) => Config::from_env()?,
    };
    let client = BridgeClient::from_config(&config)?;

    match (command.as_str(), &args[1..]) {
        ("connect", [code]) => {
            if !client.connect(code).await {
                let reason = client
                    .state()
                    .last_error
                    .unwrap_or_else(|| "Invalid session code".to_string());
                bail!("Connection failed: {}", reason);
            }
            print_json(&client.state())?;
        }
        ("status", []) => {
            client.restore().await;
            print_json(&client.state())?;
        }
        ("trial-balance", [from, to]) => {
            let from = normalize_date(from)?;
            let to = normalize_date(to)?;
            require_session(&client).await?;
            let report = client
                .fetch_trial_balance(from, to)
                .await
                .ok_or_else(|| anyhow!("Trial balance fetch failed"))?;
            print_json(&report)?;
        }
        ("month-wise", [fy, month]) => {
            let fy: i32 = fy
                .parse()
                .with_context(|| format!("invalid financial year {:?}", fy))?;
            let month: FiscalMonth = month.parse()?;
            require_session(&client).await?;
            let report = client
                .fetch_month_wise_data(fy, month)
                .await
                .ok_or_else(|| anyhow!("Month-wise fetch failed"))?;
            print_json(&report)?;
        }
        ("gst", []) => {
            require_session(&client).await?;
            let lines = client
                .fetch_gst_not_feeded()
                .await
                .ok_or_else(|| anyhow!("GST audit fetch failed"))?;
            print_json(&lines)?;
        }
        ("disconnect", []) => {
            client.disconnect().await;
        }
        _ => bail!(USAGE),
    }

    // Keep the remembered session for the next invocation
    client.shutdown().await;
    info!("Done");
    Ok(())
}
