use std::net::IpAddr;

/// Addresses of every non-loopback interface, one SSDP socket each.
pub fn local_addresses() -> std::io::Result<Vec<IpAddr>> {
    let addresses: Vec<_> = get_if_addrs::get_if_addrs()?
        .into_iter()
        .filter(|i| !i.is_loopback())
        .inspect(|i| log::debug!("Found interface {} at {}", i.name, i.ip()))
        .map(|i| i.ip())
        .collect();
    if addresses.is_empty() {
        log::warn!("No non-loopback interface available for SSDP");
    }
    Ok(addresses)
}
