//! Hardware address derivation.

use std::net::IpAddr;

use macaddr::MacAddr6;

/// Derive a MAC address from an IP address.
///
/// The result is `02:42` followed by the four IPv4 octets, or by the last
/// four bytes of an IPv6 address. The same address always yields the same
/// MAC and the first octet marks it locally administered and unicast.
#[must_use]
pub fn generate_mac_from_ip(ip: IpAddr) -> MacAddr6 {
    let tail: [u8; 4] = match ip {
        IpAddr::V4(v4) => v4.octets(),
        IpAddr::V6(v6) => {
            let o = v6.octets();
            [o[12], o[13], o[14], o[15]]
        }
    };
    MacAddr6::new(0x02, 0x42, tail[0], tail[1], tail[2], tail[3])
}
