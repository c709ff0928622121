use std::net::IpAddr;

use crate::error::Result;

/// Get all local IP addresses, loopback included
pub fn get_local_ips() -> Result<Vec<IpAddr>> {
    let ips = if_addrs::get_if_addrs()?
        .into_iter()
        .map(|iface| iface.ip())
        .collect();
    Ok(ips)
}

/// Whether `ip` belongs to this machine
pub fn is_local_ip(ip: IpAddr, local_ips: &[IpAddr]) -> bool {
    ip.is_loopback() || local_ips.contains(&ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_always_local() {
        assert!(is_local_ip("127.0.0.1".parse().unwrap(), &[]));
    }

    #[test]
    fn matches_against_known_addresses() {
        let local: Vec<IpAddr> = vec!["10.0.0.5".parse().unwrap()];
        assert!(is_local_ip("10.0.0.5".parse().unwrap(), &local));
        assert!(!is_local_ip("10.0.0.6".parse().unwrap(), &local));
    }
}
