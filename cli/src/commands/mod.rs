use crate::Command;
use anyhow::Context;
use nat_upnp::Client;
use nat_upnp::DescriptionFilter;
use nat_upnp::MappingFilter;
use nat_upnp::MappingOptions;
use nat_upnp::PortMapping;
use regex::Regex;

pub async fn run(client: &Client, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Gateway => {
            let gateway = client.get_gateway().await?;
            println!("Description: {}", gateway.device().description_url());
            println!("Service:     {}", gateway.info().service_type);
            println!("Control URL: {}", gateway.info().control_url);
            println!("Local IP:    {}", gateway.local_address());
        }
        Command::Ip => println!("{}", client.get_public_ip().await?),
        Command::Map {
            public,
            private,
            protocol,
            description,
            ttl,
        } => {
            let private = private.unwrap_or_else(|| public.clone());
            let options = MappingOptions {
                public: Some(public.into()),
                private: Some(private.into()),
                protocol: Some(protocol),
                description,
                ttl,
            };
            client
                .create_mapping(&options)
                .await
                .context("Failed to create the mapping")?;
        }
        Command::Unmap { public, protocol } => {
            let options = MappingOptions {
                public: Some(public.into()),
                protocol: Some(protocol),
                ..Default::default()
            };
            client
                .remove_mapping(&options)
                .await
                .context("Failed to remove the mapping")?;
        }
        Command::List {
            local,
            description,
            pattern,
            json,
        } => {
            let description = match (description, pattern) {
                (Some(text), _) => Some(DescriptionFilter::Contains(text)),
                (None, Some(pattern)) => Some(DescriptionFilter::Matches(
                    Regex::new(&pattern)
                        .with_context(|| format!("Invalid pattern `{}`", pattern))?,
                )),
                (None, None) => None,
            };
            let mappings = client
                .get_mappings(&MappingFilter { local, description })
                .await?;
            log::debug!("Found {} mapping(s)", mappings.len());
            if json {
                println!("{}", serde_json::to_string_pretty(&mappings)?);
            } else {
                mappings.iter().for_each(|m| println!("{}", format_mapping(m)));
            }
        }
    };
    Ok(())
}

fn format_mapping(mapping: &PortMapping) -> String {
    let public_host = match mapping.public.host.as_str() {
        "" => "*",
        host => host,
    };
    let mut line = format!(
        "{} {}:{} -> {}:{} ttl={} {:?}",
        mapping.protocol,
        public_host,
        mapping.public.port,
        mapping.private.host,
        mapping.private.port,
        mapping.ttl,
        mapping.description
    );
    if !mapping.enabled {
        line.push_str(" (disabled)");
    }
    if mapping.local {
        line.push_str(" (local)");
    }
    line
}
