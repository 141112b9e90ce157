//! # Capabilities
//!
//! Role permissions as a bitmask. A role's `capabilities` column stores the
//! raw bits; unknown bits are ignored when read back.
//!
//! ```text
//! bit 0  VOID_SALE       void a completed sale (or approve one by PIN)
//! bit 1  RETRY_INVOICE   resubmit a pending / failed fiscal invoice
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use ts_rs::TS;

/// A single grantable capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    VoidSale,
    RetryInvoice,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::VoidSale, Capability::RetryInvoice];

    #[inline]
    pub const fn bit(self) -> u32 {
        match self {
            Capability::VoidSale => 1 << 0,
            Capability::RetryInvoice => 1 << 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capability::VoidSale => "VOID_SALE",
            Capability::RetryInvoice => "RETRY_INVOICE",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of capabilities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Capabilities(u32);

impl Capabilities {
    /// No capabilities.
    pub const NONE: Capabilities = Capabilities(0);

    /// Builds a set from raw bits, dropping bits no capability uses.
    pub fn from_bits_truncate(bits: u32) -> Self {
        let known = Capability::ALL.iter().fold(0, |acc, c| acc | c.bit());
        Capabilities(bits & known)
    }

    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }

    #[inline]
    pub const fn with(self, capability: Capability) -> Self {
        Capabilities(self.0 | capability.bit())
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl From<Capability> for Capabilities {
    fn from(capability: Capability) -> Self {
        Capabilities(capability.bit())
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Capabilities::NONE, Capabilities::with)
    }
}

impl BitOr<Capability> for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Capabilities {
        self.with(rhs)
    }
}

impl BitOr for Capability {
    type Output = Capabilities;

    fn bitor(self, rhs: Capability) -> Capabilities {
        Capabilities::from(self).with(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let manager = Capability::VoidSale | Capability::RetryInvoice;
        assert!(manager.contains(Capability::VoidSale));
        assert!(manager.contains(Capability::RetryInvoice));
        assert!(!Capabilities::NONE.contains(Capability::VoidSale));
        assert_eq!(manager.bits(), 0b11);
    }

    #[test]
    fn test_unknown_bits_are_dropped() {
        let caps = Capabilities::from_bits_truncate(0b1000_0001);
        assert_eq!(caps, Capabilities::from(Capability::VoidSale));
    }

    #[test]
    fn test_iter_and_collect() {
        let caps: Capabilities = [Capability::RetryInvoice].into_iter().collect();
        let listed: Vec<_> = caps.iter().map(|c| c.to_string()).collect();
        assert_eq!(listed, vec!["RETRY_INVOICE"]);
    }
}
