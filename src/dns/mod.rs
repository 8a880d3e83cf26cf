//! Forward resolution of targets and reverse lookups of hop addresses

pub mod resolver;
pub mod reverse;

pub use resolver::{create_default_resolver, AddressResolver, StaticResolver, SystemResolver};
pub use reverse::{
    reverse_dns_lookup, DnsReverseLookup, ReverseDnsError, ReverseLookup, StaticReverseLookup,
};
