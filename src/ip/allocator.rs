//! IP address allocation logic.
//!
//! All assignments are pure functions of ordinal positions so that
//! repeated builds of the same configuration produce identical addresses.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// Management network shared by the NAT gateway and every physical node
pub const DEFAULT_MANAGEMENT_SUBNET: Ipv4Net =
    Ipv4Net::new_assert(Ipv4Addr::new(192, 168, 254, 0), 24);

/// Subnet used by virtual endpoints inside each nested network
pub const DEFAULT_VIRTUAL_SUBNET: Ipv4Net = Ipv4Net::new_assert(Ipv4Addr::new(10, 0, 0, 0), 24);

/// Deterministic address plan for the management network and the
/// virtual subnet shared by every nested network.
///
/// Management addresses are `network + ordinal + 2`, leaving `.1` to the
/// NAT gateway. Virtual endpoint addresses are `network + j` where `j` is the
/// endpoint's 1-based position within its placement; nested networks are
/// isolated broadcast domains, so the node does not shift the address.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressAllocator {
    management: Ipv4Net,
    virtual_subnet: Ipv4Net,
}

impl AddressAllocator {
    pub fn new(management: Ipv4Net, virtual_subnet: Ipv4Net) -> Self {
        Self {
            management: management.trunc(),
            virtual_subnet: virtual_subnet.trunc(),
        }
    }

    /// Address of the NAT gateway on the management network
    pub fn gateway_address(&self) -> Ipv4Net {
        nth_host(self.management, 1)
    }

    /// Management address of the physical node at `ordinal`
    pub fn management_address(&self, ordinal: usize) -> Ipv4Net {
        nth_host(self.management, ordinal as u32 + 2)
    }

    /// How many physical nodes fit on the management network
    pub fn management_capacity(&self) -> usize {
        host_capacity(self.management).saturating_sub(1) as usize
    }

    /// Address of virtual endpoint `endpoint_ordinal` (1-based)
    pub fn data_address(&self, endpoint_ordinal: u32) -> Ipv4Net {
        nth_host(self.virtual_subnet, endpoint_ordinal)
    }

    /// How many endpoints a single placement may address
    pub fn data_capacity(&self) -> u32 {
        host_capacity(self.virtual_subnet)
    }

    pub fn management_subnet(&self) -> Ipv4Net {
        self.management
    }

    pub fn virtual_subnet(&self) -> Ipv4Net {
        self.virtual_subnet
    }
}

/// The `n`th address after the network address, keeping the prefix length.
///
/// Callers check `n` against [`host_capacity`] first.
fn nth_host(net: Ipv4Net, n: u32) -> Ipv4Net {
    let addr = Ipv4Addr::from(u32::from(net.network()).wrapping_add(n));
    Ipv4Net::new(addr, net.prefix_len()).unwrap_or(net)
}

/// Usable host addresses in `net`, network and broadcast excluded
fn host_capacity(net: Ipv4Net) -> u32 {
    match net.prefix_len() {
        32 => 1,
        31 => 2,
        p => ((1u64 << (32 - u32::from(p))) - 2).min(u64::from(u32::MAX)) as u32,
    }
}

impl Default for AddressAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MANAGEMENT_SUBNET, DEFAULT_VIRTUAL_SUBNET)
    }
}
