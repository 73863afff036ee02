use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::Subcommand;
use rand::Rng;
use rand::distr::Alphanumeric;
use toml_edit::{Array, DocumentMut, Item, Table, value};
use tracing::info;

const DEFAULT_LISTEN: &str = "127.0.0.1:3000";
const DEFAULT_GATEWAY: &str = "https://trustless-gateway.link";

#[derive(Subcommand)]
pub enum CmdConfig {
    /// Creates the node config file if it doesn't exist and generates an
    /// access token
    Init {
        /// Owner id the generated access token maps to
        #[arg(long, default_value = "default")]
        owner: String,
    },
}

impl CmdConfig {
    pub fn run(self, node_config_file: PathBuf, local_data_dir: &Path) -> anyhow::Result<()> {
        let mut doc = if node_config_file.exists() {
            fs::read_to_string(&node_config_file)?
        } else {
            if let Some(parent) = node_config_file.parent() {
                fs::create_dir_all(parent)?;
            }
            "".to_owned()
        }
        .parse::<DocumentMut>()
        .context("could not parse node config file")?;

        match self {
            Self::Init { owner } => {
                table(&mut doc, "server")?
                    .entry("listen")
                    .or_insert(value(DEFAULT_LISTEN));

                let ledger = table(&mut doc, "ledger")?;
                if !ledger.contains_key("type") {
                    ledger.insert("type", value("redb"));
                    ledger.insert("path", value(path_str(&local_data_dir.join("ledger"))?));
                }

                let content = table(&mut doc, "content")?;
                content.entry("gateway").or_insert(value(DEFAULT_GATEWAY));
                if !content.contains_key("blob_dir") {
                    content.insert("blob_dir", value(path_str(&local_data_dir.join("blobs"))?));
                }

                table(&mut doc, "network")?
                    .entry("announce")
                    .or_insert(value(Array::new()));

                let users = table(&mut doc, "users")?;
                if users.is_empty() {
                    info!("generating access token for owner {owner:?}");
                    let token: String = rand::rng()
                        .sample_iter(&Alphanumeric)
                        .take(40)
                        .map(char::from)
                        .collect();
                    users.insert(&token, value(owner));
                    println!("access token: {token}");
                }
            }
        }

        info!("writing to config file {node_config_file:?}");

        let tmp_path = node_config_file.with_extension("tmp");
        let mut tmp = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(doc.to_string().as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, node_config_file)?;
        Ok(())
    }
}

fn table<'a>(doc: &'a mut DocumentMut, key: &str) -> anyhow::Result<&'a mut Table> {
    doc.entry(key)
        .or_insert(Item::Table(Table::new()))
        .as_table_mut()
        .with_context(|| format!("`{key}` in node config is not a table"))
}

fn path_str(path: &Path) -> anyhow::Result<&str> {
    path.to_str()
        .with_context(|| format!("{} is not valid utf-8", path.display()))
}
