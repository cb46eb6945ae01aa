//! Overlay address derivation
//!
//! Every node's mesh address is a pure function of the mesh prefix and
//! its public key, so any node can compute any other node's address
//! without coordination.

use ipnet::IpNet;
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::keys::PublicKey;

/// Derive the single-host overlay address of `key` inside `prefix`.
///
/// Each whole host byte of the prefix is overwritten with the matching
/// trailing byte of SHA-256(key). All-zero and all-ones host parts are
/// not excluded, so the result may coincide with the prefix's network or
/// broadcast address.
pub fn derive(prefix: &IpNet, key: &PublicKey) -> IpNet {
    let network = prefix.trunc();
    let host_bytes = usize::from(network.max_prefix_len() - network.prefix_len()) / 8;
    let digest = Sha256::digest(key.as_bytes());

    let addr = match network.addr() {
        IpAddr::V4(v4) => {
            let mut octets = v4.octets();
            overwrite_tail(&mut octets, &digest, host_bytes);
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        IpAddr::V6(v6) => {
            let mut octets = v6.octets();
            overwrite_tail(&mut octets, &digest, host_bytes);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
    };

    // /32 or /128
    IpNet::from(addr)
}

fn overwrite_tail(octets: &mut [u8], digest: &[u8], count: usize) {
    let count = count.min(octets.len());
    for i in 1..=count {
        octets[octets.len() - i] = digest[digest.len() - i];
    }
}
