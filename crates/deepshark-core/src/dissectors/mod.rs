//! Bundled decoders.
//!
//! `data` and `frame` belong to the engine itself and are always present.
//! The rest are ordinary `Protocol` implementations registered through
//! `EngineBuilder::with_builtin_dissectors`:
//!
//! ```text
//! wtap_encap ─ 1 ──> eth ─ ethertype 0x0800 ──> ip ─ ip.proto 17 ──> udp ─ udp.port ──> ...
//!                        └ ethertype 0x8847 ──> mpls ─ mpls.label / mpls.pfn ──> ip, SAToP
//! wtap_encap ─ 101 ─> ip
//! ```
//!
//! HDCP and SAToP register no static entries of their own; they are reached
//! through Decode-As (`wtap_encap`, `mpls.label`, `mpls.pfn`, `udp.port`) or
//! the `pwsatopcw.udp.port` preference.

pub mod data;
pub mod eth;
pub mod frame;
pub mod hdcp;
pub mod ipv4;
pub mod mpls;
pub mod pw;
pub mod udp;

use crate::engine::Protocol;

/// Every bundled protocol, in registration order.
pub fn builtin() -> Vec<Box<dyn Protocol>> {
    vec![
        Box::new(eth::Ethernet::default()),
        Box::new(mpls::Mpls::default()),
        Box::new(ipv4::Ipv4::default()),
        Box::new(udp::Udp::default()),
        Box::new(hdcp::Hdcp::default()),
        Box::new(pw::PwPadding::default()),
        Box::new(pw::Satop::default()),
    ]
}
