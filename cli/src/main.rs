mod commands;

use clap::Parser;
use clap::Subcommand;
use nat_upnp::Client;
use nat_upnp::ClientOptions;
use nat_upnp::Protocol;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let client = Client::new(ClientOptions {
        timeout: Duration::from_millis(cli.timeout),
        source_port: cli.source_port,
    })?;
    let result = crate::commands::run(&client, cli.command).await;
    client.close();
    result
}

/// Manages port mappings on the UPnP gateway of the local network.
#[derive(Parser)]
#[command(version)]
struct Cli {
    /// Milliseconds to wait for the gateway to answer discovery.
    #[arg(long, global = true, default_value_t = 1800)]
    timeout: u64,

    /// Local port for SSDP sockets, 0 picks any.
    #[arg(long, global = true, default_value_t = 0)]
    source_port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Shows the discovered gateway and its control service.
    Gateway,

    /// Prints the public IP address of the gateway.
    Ip,

    /// Forwards a public port to this host.
    Map {
        public: String,

        /// Port on this host, defaults to the public port.
        #[arg(long)]
        private: Option<String>,

        #[arg(long, default_value = "tcp")]
        protocol: Protocol,

        #[arg(long)]
        description: Option<String>,

        /// Lease in seconds, 0 for permanent.
        #[arg(long)]
        ttl: Option<u32>,
    },

    /// Removes a forwarded port.
    Unmap {
        public: String,

        #[arg(long, default_value = "tcp")]
        protocol: Protocol,
    },

    /// Lists the gateway's port mappings.
    List {
        /// Only mappings pointing at this host.
        #[arg(long)]
        local: bool,

        /// Only mappings whose description contains this text.
        #[arg(long, conflicts_with = "pattern")]
        description: Option<String>,

        /// Only mappings whose description matches this regular expression.
        #[arg(long)]
        pattern: Option<String>,

        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_map() {
        let cli = Cli::try_parse_from([
            "nat-upnp", "map", "8080", "--protocol", "UDP", "--ttl", "0", "--timeout", "500",
        ])
        .unwrap();

        assert_eq!(cli.timeout, 500);
        assert_eq!(
            cli.command,
            Command::Map {
                public: "8080".into(),
                private: None,
                protocol: Protocol::Udp,
                description: None,
                ttl: Some(0),
            }
        );
    }

    #[test]
    fn reject_unknown_protocol() {
        let result = Cli::try_parse_from(["nat-upnp", "unmap", "8080", "--protocol", "sctp"]);
        assert!(result.is_err());
    }

    #[test]
    fn description_conflicts_with_pattern() {
        let result = Cli::try_parse_from([
            "nat-upnp",
            "list",
            "--description",
            "web",
            "--pattern",
            "^web",
        ]);
        assert!(result.is_err());
    }
}
