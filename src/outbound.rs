//! Guards for requests the server makes on a caller's behalf
//!
//! A URL search makes the server fetch a caller-supplied page, so the target
//! must be a public address. Literal hosts are checked when the request is
//! validated; hostnames are resolved and checked again right before the fetch.

use std::net::{IpAddr, Ipv4Addr};
use tracing::warn;
use url::{Host, Url};

use crate::error::{AdapterError, AdapterResult};

/// Whether `ip` is routable on the public internet.
pub fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(v4),
            None => {
                !(v6.is_loopback()
                    || v6.is_unspecified()
                    || v6.is_multicast()
                    || v6.is_unique_local()
                    || v6.is_unicast_link_local())
            }
        },
    }
}

fn is_public_v4(ip: Ipv4Addr) -> bool {
    let [first, second, ..] = ip.octets();
    let shared = first == 100 && (64..128).contains(&second);
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_multicast()
        || ip.is_documentation()
        || shared
        || first == 0
        || first >= 240)
}

/// Checks what can be known without DNS: IP literals and `localhost` names.
pub fn host_is_public(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain != "localhost" && !domain.ends_with(".localhost")
        }
        Some(Host::Ipv4(ip)) => is_public_v4(ip),
        Some(Host::Ipv6(ip)) => is_public_ip(IpAddr::V6(ip)),
        None => false,
    }
}

fn is_allowed(url: &Url, allowed_hosts: &[String]) -> bool {
    url.host_str()
        .is_some_and(|host| allowed_hosts.iter().any(|allowed| allowed.eq_ignore_ascii_case(host)))
}

/// Rejects `url` unless its host and every address it resolves to are public.
///
/// Hosts listed in `allowed_hosts` skip the check.
pub async fn ensure_public(url: &Url, allowed_hosts: &[String]) -> AdapterResult<()> {
    if is_allowed(url, allowed_hosts) {
        return Ok(());
    }
    if !host_is_public(url) {
        warn!("Refusing to fetch non-public host {}", url.host_str().unwrap_or_default());
        return Err(AdapterError::Blocked);
    }

    let Some(Host::Domain(domain)) = url.host() else {
        return Ok(());
    };
    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|_| AdapterError::UpstreamUnavailable(0))?
        .collect();

    if addrs.is_empty() {
        return Err(AdapterError::UpstreamUnavailable(0));
    }
    if let Some(private) = addrs.iter().find(|addr| !is_public_ip(addr.ip())) {
        warn!("Refusing to fetch {} which resolves to {}", domain, private.ip());
        return Err(AdapterError::Blocked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn private_ranges_are_not_public() {
        for ip in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(!is_public_ip(ip.parse().unwrap()), "{ip}");
        }
        assert!(is_public_ip("93.184.216.34".parse().unwrap()));
        assert!(is_public_ip("2606:4700::1111".parse().unwrap()));
    }

    #[test]
    fn literal_hosts() {
        assert!(!host_is_public(&url("http://localhost:3000/")));
        assert!(!host_is_public(&url("http://api.localhost/")));
        assert!(!host_is_public(&url("http://[::1]/")));
        assert!(host_is_public(&url("https://shop.example/p/1")));
    }

    #[tokio::test]
    async fn allowlisted_hosts_skip_the_check() {
        let target = url("http://127.0.0.1:8080/p/1");
        assert_eq!(ensure_public(&target, &[]).await, Err(AdapterError::Blocked));
        assert!(ensure_public(&target, &["127.0.0.1".to_string()]).await.is_ok());
    }
}
