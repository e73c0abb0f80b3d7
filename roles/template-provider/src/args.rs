use clap::Parser;
use std::path::PathBuf;
use template_provider::{Error, TemplateProviderConfig};

/// CLI of the `sv2-tp` binary. Every flag overrides the corresponding
/// value from the (optional) TOML configuration file.
#[derive(Parser, Debug)]
#[command(
    name = "sv2-tp",
    version,
    about = "Stratum v2 Template Provider. Serves block templates to mining clients; connects to a bitcoin node over a local socket."
)]
pub struct Args {
    #[arg(short = 'c', long = "config", help = "Path to the TOML configuration file")]
    pub config_path: Option<PathBuf>,
    #[arg(long = "sv2bind", help = "Bind to the given address (default: 127.0.0.1)")]
    pub sv2_bind: Option<String>,
    #[arg(long = "sv2port", help = "Listen for Stratum v2 connections on this port (default: 8442)")]
    pub sv2_port: Option<u16>,
    #[arg(
        long = "sv2interval",
        help = "Template update interval in seconds (default: 30)"
    )]
    pub sv2_interval: Option<u64>,
    #[arg(
        long = "sv2feedelta",
        help = "Minimum fee delta in satoshis before an update is pushed (default: 1000)"
    )]
    pub sv2_fee_delta: Option<i64>,
    #[arg(
        long = "ipcconnect",
        help = "Node endpoint: 'unix' for the default socket or 'unix:<path>' (default: unix)"
    )]
    pub ipc_connect: Option<String>,
    #[arg(long = "datadir", help = "Data directory for keys and solved blocks")]
    pub datadir: Option<PathBuf>,
    #[arg(long = "log-file", help = "Also write logs to this file")]
    pub log_file: Option<PathBuf>,
}

/// Parses the CLI and merges it over the configuration file.
pub fn process_cli_args() -> Result<TemplateProviderConfig, Error> {
    let args = Args::parse();

    let mut config = match &args.config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| Error::BadCliArgs(format!("cannot read {}: {}", path.display(), e)))?;
            toml::from_str(&raw)
                .map_err(|e| Error::BadCliArgs(format!("cannot parse {}: {}", path.display(), e)))?
        }
        None => TemplateProviderConfig::default(),
    };

    if let Some(bind) = args.sv2_bind {
        config.sv2_bind = bind;
    }
    if let Some(port) = args.sv2_port {
        config.sv2_port = port;
    }
    if let Some(interval) = args.sv2_interval {
        if interval < 1 {
            return Err(Error::BadCliArgs(
                "--sv2interval must be at least one second".into(),
            ));
        }
        config.sv2_interval = interval;
    }
    if let Some(fee_delta) = args.sv2_fee_delta {
        config.sv2_feedelta = fee_delta;
    }
    if let Some(ipc_connect) = args.ipc_connect {
        config.ipc_connect = ipc_connect;
    }
    if let Some(datadir) = args.datadir {
        config.datadir = datadir;
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file;
    }
    Ok(config)
}
