//! Pricing catalogue.
//!
//! Prices are in BRL centavos. Credit packs are one-time purchases; Pro is a
//! monthly subscription with unlimited optimizations.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

/// Pro plan monthly price (R$ 49,90).
pub const PRO_MONTHLY_PRICE_CENTS: i64 = 4990;

/// One-time credit packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPack {
    /// 5 credits, R$ 29,90.
    Starter,
    /// 15 credits, R$ 59,90.
    Professional,
    /// 40 credits, R$ 129,90.
    Business,
}

impl CreditPack {
    /// Every pack, cheapest first.
    pub const ALL: [Self; 3] = [Self::Starter, Self::Professional, Self::Business];

    /// Credits granted by the pack.
    #[must_use]
    pub const fn credits(self) -> i64 {
        match self {
            Self::Starter => 5,
            Self::Professional => 15,
            Self::Business => 40,
        }
    }

    /// Default price in centavos.
    #[must_use]
    pub const fn price_cents(self) -> i64 {
        match self {
            Self::Starter => 2990,
            Self::Professional => 5990,
            Self::Business => 12990,
        }
    }

    /// Storage and metadata representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starter => "starter",
            Self::Professional => "professional",
            Self::Business => "business",
        }
    }
}

impl fmt::Display for CreditPack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditPack {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(Self::Starter),
            "professional" => Ok(Self::Professional),
            "business" => Ok(Self::Business),
            _ => Err(ParseEnumError::new("credit pack", s)),
        }
    }
}

/// A purchasable pack at its configured price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackOffer {
    /// Which pack.
    pub pack: CreditPack,
    /// Credits granted.
    pub credits: i64,
    /// Price in centavos.
    pub price_cents: i64,
}

/// Prices offered to customers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// ISO currency code, lowercase as Stripe expects.
    pub currency: String,
    /// Pro plan monthly price in centavos.
    pub pro_monthly_price_cents: i64,
    /// Credit packs on sale.
    pub packs: Vec<PackOffer>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: "brl".to_string(),
            pro_monthly_price_cents: PRO_MONTHLY_PRICE_CENTS,
            packs: CreditPack::ALL
                .into_iter()
                .map(|pack| PackOffer {
                    pack,
                    credits: pack.credits(),
                    price_cents: pack.price_cents(),
                })
                .collect(),
        }
    }
}

impl PricingConfig {
    /// The offer for `pack`, if it is on sale.
    #[must_use]
    pub fn offer(&self, pack: CreditPack) -> Option<&PackOffer> {
        self.packs.iter().find(|offer| offer.pack == pack)
    }
}

/// Format centavos as `R$ 29,90`.
#[must_use]
pub fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let cents = cents.abs();
    format!("{sign}R$ {},{:02}", cents / 100, cents % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalogue_lists_every_pack() {
        let pricing = PricingConfig::default();
        assert_eq!(pricing.packs.len(), 3);
        assert_eq!(pricing.offer(CreditPack::Professional).unwrap().credits, 15);
        assert_eq!(pricing.currency, "brl");
    }

    #[test]
    fn pack_names_parse() {
        assert_eq!("business".parse::<CreditPack>(), Ok(CreditPack::Business));
        assert!("mega".parse::<CreditPack>().is_err());
    }

    #[test]
    fn brl_formatting() {
        assert_eq!(format_brl(2990), "R$ 29,90");
        assert_eq!(format_brl(5), "R$ 0,05");
        assert_eq!(format_brl(-12990), "-R$ 129,90");
    }
}
