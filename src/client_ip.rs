use std::net::{IpAddr, SocketAddr};

use axum::http::HeaderMap;
use ipnet::IpNet;

use crate::cidr;

/// Resolved identity of the requesting client, inserted into request
/// extensions by the admission middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Works out which address a request came from.
///
/// Forwarding headers are only believed when the TCP peer is one of the
/// trusted proxies; otherwise anyone could pick their own rate-limit
/// identity and slip past IP restrictions.
#[derive(Debug, Clone, Default)]
pub struct ClientIpResolver {
    trusted_proxies: Vec<IpNet>,
}

impl ClientIpResolver {
    pub fn new(trusted_proxies: Vec<IpNet>) -> Self {
        Self { trusted_proxies }
    }

    pub fn resolve(&self, peer: Option<SocketAddr>, headers: &HeaderMap) -> String {
        let Some(peer) = peer else {
            return "unknown".to_string();
        };
        let peer_ip = peer.ip();

        if !self.is_trusted(&peer_ip) {
            return peer_ip.to_string();
        }

        if let Some(real_ip) = header_ip(headers, "x-real-ip") {
            return real_ip.to_string();
        }

        // Walk the chain from the nearest hop outwards, skipping our own proxies.
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            let hops: Vec<IpAddr> = forwarded
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect();
            if let Some(client) = hops.iter().rev().find(|ip| !self.is_trusted(ip)) {
                return client.to_string();
            }
            if let Some(first) = hops.first() {
                return first.to_string();
            }
        }

        peer_ip.to_string()
    }

    fn is_trusted(&self, ip: &IpAddr) -> bool {
        cidr::contains(&self.trusted_proxies, ip)
    }
}

fn header_ip(headers: &HeaderMap, name: &str) -> Option<IpAddr> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
