//! Subnet registry.
//!
//! Records every address the topology will apply, keyed by node and
//! interface, and reports overlapping prefixes. Overlap is never fatal on
//! its own: routing experiments deliberately reuse address space, so the
//! caller decides whether a report is a warning or an error.

use std::fmt;

use super::address::InterfaceAddress;

/// One applied interface address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetEntry {
    pub node: String,
    pub interface: String,
    pub address: InterfaceAddress,
    /// Layer-2 segment the interface sits on. Interfaces joined by links
    /// and switches share a segment.
    pub segment: usize,
}

impl fmt::Display for SubnetEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} ({})", self.node, self.interface, self.address)
    }
}

/// Kind of conflict between two entries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapKind {
    /// Overlapping prefixes on different L2 segments.
    CrossSegment,
    /// The same host address on two interfaces.
    DuplicateAddress,
}

/// A pair of entries whose addresses conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetOverlap {
    pub kind: OverlapKind,
    pub first: SubnetEntry,
    pub second: SubnetEntry,
}

impl fmt::Display for SubnetOverlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            OverlapKind::CrossSegment => write!(
                f,
                "{} and {} overlap but are on different segments",
                self.first, self.second
            ),
            OverlapKind::DuplicateAddress => write!(
                f,
                "{} and {} use the same address",
                self.first, self.second
            ),
        }
    }
}

/// Registry of the addresses a topology applies.
#[derive(Debug, Default)]
pub struct SubnetRegistry {
    entries: Vec<SubnetEntry>,
}

impl SubnetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an applied address.
    pub fn register(&mut self, entry: SubnetEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[SubnetEntry] {
        &self.entries
    }

    /// All conflicting pairs, in registration order.
    pub fn overlaps(&self) -> Vec<SubnetOverlap> {
        let mut found = Vec::new();

        for (i, first) in self.entries.iter().enumerate() {
            for second in self.entries.iter().skip(i + 1) {
                let kind = if first.address.address() == second.address.address() {
                    OverlapKind::DuplicateAddress
                } else if first.segment != second.segment && first.address.overlaps(&second.address) {
                    OverlapKind::CrossSegment
                } else {
                    continue;
                };

                found.push(SubnetOverlap {
                    kind,
                    first: first.clone(),
                    second: second.clone(),
                });
            }
        }

        found
    }
}
