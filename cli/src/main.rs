use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use resp_client::{Buffer, Endpoint, SyncConfig, SyncFacade};

#[derive(Parser)]
#[command(name = "resp-client-cli")]
#[command(about = "A CLI client for talking to a RESP server", long_about = None)]
struct Cli {
    #[arg(long, default_value = "127.0.0.1", global = true)]
    host: String,
    #[arg(long, default_value_t = 6379, global = true)]
    port: u16,
    #[arg(long, default_value_t = 5000, global = true)]
    timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a bare command and print the decoded reply.
    Command { name: String, args: Vec<String> },
    /// Send several commands as one pipelined round trip.
    Pipeline {
        /// Each group is `name[,arg1,arg2,...]`, e.g. `PING SET,k,v GET,k`.
        commands: Vec<String>,
    },
    /// Shorthand for `command PING`.
    Ping,
    /// Shorthand for `command SET key value`.
    Set { key: String, value: String },
    /// Shorthand for `command GET key`.
    Get { key: String },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let config = SyncConfig {
        connect_timeout: Duration::from_millis(cli.timeout_ms),
        command_timeout: Duration::from_millis(cli.timeout_ms),
        ..SyncConfig::default()
    };
    let mut facade = SyncFacade::new(config);
    facade.connect(Endpoint::Tcp(cli.host.clone(), cli.port))?;

    let reply = match cli.command {
        Commands::Command { name, args } => {
            let args = args.into_iter().map(Buffer::from_str).collect();
            facade.command(name, args)?
        }
        Commands::Ping => facade.command("PING", Vec::new())?,
        Commands::Set { key, value } => {
            facade.command("SET", vec![Buffer::from_str(key), Buffer::from_str(value)])?
        }
        Commands::Get { key } => facade.command("GET", vec![Buffer::from_str(key)])?,
        Commands::Pipeline { commands } => {
            let mut builder = facade.pipeline();
            for group in commands {
                let mut parts = group.split(',');
                let name = parts.next().ok_or_else(|| anyhow!("empty command group"))?.to_string();
                let args: Vec<Buffer> = parts.map(Buffer::from_str).collect();
                builder = builder.command(name, args);
            }
            builder.commit()?
        }
    };

    println!("{}", reply.inspect());
    Ok(())
}
