use anyhow::Context;
use clap::{Args, Subcommand};
use futures::TryStreamExt;
use s5_pins_client::{HttpPinningApi, RemotePinner, RemotePinnerConfig, RetryPolicy};
use s5_pins_core::api::PinStatus;
use s5_pins_core::listing::parse_status_list;
use s5_pins_core::{Cid, ListQuery, Pin, PinMeta, Status, TextMatchingStrategy};
use s5_pins_service::network::TcpNetwork;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct RemoteArgs {
    /// Base URL of the pinning service
    #[arg(long, env = "S5_PINS_ENDPOINT")]
    endpoint: String,
    /// Access token for the pinning service
    #[arg(long, env = "S5_PINS_TOKEN", hide_env_values = true)]
    token: String,
    /// Maximum number of status polls while waiting for a pin to settle
    #[arg(long, default_value_t = 10)]
    retries: u32,
    /// Seconds to wait for a TCP connection to a delegate
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    dial_timeout: u64,
}

#[derive(Args)]
pub struct PinArgs {
    cid: String,
    #[arg(long)]
    name: Option<String>,
    /// Address the service can fetch the content from (repeatable)
    #[arg(long = "origin", value_name = "MULTIADDR")]
    origins: Vec<String>,
    /// Metadata entry (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta_entry)]
    meta: Vec<(String, String)>,
}

impl PinArgs {
    fn into_pin(self) -> anyhow::Result<Pin> {
        let mut pin = Pin::new(Cid::parse(&self.cid)?)
            .with_origins(self.origins)
            .with_meta(self.meta.into_iter().collect::<PinMeta>());
        pin.name = self.name;
        Ok(pin)
    }
}

fn parse_meta_entry(input: &str) -> Result<(String, String), String> {
    input
        .split_once('=')
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .ok_or_else(|| format!("expected KEY=VALUE, got {input:?}"))
}

#[derive(Subcommand)]
pub enum RemoteCmd {
    /// Pin a CID and wait until the service reports it pinned or failed
    Add(PinArgs),
    /// Replace an existing pin request with a new pin
    Replace {
        requestid: String,
        #[command(flatten)]
        pin: PinArgs,
    },
    /// List pin requests, newest first
    Ls {
        #[arg(long)]
        cid: Vec<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "match", value_name = "STRATEGY", default_value = "exact")]
        match_strategy: TextMatchingStrategy,
        /// Comma separated statuses, e.g. `queued,pinning`
        #[arg(long)]
        status: Option<String>,
    },
    /// Show the newest pin request for a CID
    Get { cid: String },
    /// Remove every pin request for a CID
    Rm { cid: String },
    /// Print whether a CID is pinned
    IsPinned { cid: String },
}

pub async fn run(args: RemoteArgs, cmd: RemoteCmd) -> anyhow::Result<()> {
    let api = Arc::new(HttpPinningApi::new(args.endpoint, args.token));
    let network = Arc::new(TcpNetwork::new(
        Vec::new(),
        Duration::from_secs(args.dial_timeout),
    ));
    let pinner = RemotePinner::new(
        api,
        network,
        RemotePinnerConfig {
            retry: RetryPolicy {
                retries: args.retries,
                ..Default::default()
            },
            ..Default::default()
        },
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    match cmd {
        RemoteCmd::Add(pin) => {
            let status = pinner.add_pin(pin.into_pin()?, &cancel).await?;
            report(status)?;
        }
        RemoteCmd::Replace { requestid, pin } => {
            let status = pinner
                .replace_pin(&requestid, pin.into_pin()?, &cancel)
                .await?;
            report(status)?;
        }
        RemoteCmd::Ls {
            cid,
            name,
            match_strategy,
            status,
        } => {
            let mut query = ListQuery::default();
            for cid in cid {
                query.cids.push(Cid::parse(&cid)?);
            }
            if let Some(name) = name {
                query = query.with_name(name, match_strategy);
            }
            if let Some(status) = status {
                query = query.with_status(parse_status_list(&status)?);
            }
            let mut results = std::pin::pin!(pinner.ls(query));
            while let Some(status) = results.try_next().await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    status.requestid,
                    status.status.as_str(),
                    status.created,
                    status.pin.cid,
                    status.pin.name.as_deref().unwrap_or("")
                );
            }
        }
        RemoteCmd::Get { cid } => {
            let status = pinner.get(&Cid::parse(&cid)?).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        RemoteCmd::Rm { cid } => {
            let removed = pinner.rm(&Cid::parse(&cid)?).await?;
            println!("removed {removed} pin request(s)");
        }
        RemoteCmd::IsPinned { cid } => {
            println!("{}", pinner.is_pinned(&Cid::parse(&cid)?).await?);
        }
    }
    Ok(())
}

fn report(status: PinStatus) -> anyhow::Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&status).context("could not encode pin status")?
    );
    if matches!(status.status, Status::Queued | Status::Pinning) {
        tracing::warn!(requestid = %status.requestid, "pin has not settled yet");
    }
    status.into_result()?;
    Ok(())
}
