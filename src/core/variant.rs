//! Account variants and the hiscores endpoint each one is ranked on

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccountVariant {
    #[default]
    Normal,
    Ironman,
    HardcoreIronman,
    UltimateIronman,
}

impl AccountVariant {
    pub const ALL: [AccountVariant; 4] = [
        AccountVariant::Normal,
        AccountVariant::Ironman,
        AccountVariant::HardcoreIronman,
        AccountVariant::UltimateIronman,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            AccountVariant::Normal => "Normal",
            AccountVariant::Ironman => "Ironman",
            AccountVariant::HardcoreIronman => "Hardcore Ironman",
            AccountVariant::UltimateIronman => "Ultimate Ironman",
        }
    }

    /// Path segment of the hiscores table for this variant.
    pub fn endpoint(&self) -> &'static str {
        match self {
            AccountVariant::Normal => "m=hiscore_oldschool",
            AccountVariant::Ironman => "m=hiscore_oldschool_ironman",
            AccountVariant::HardcoreIronman => "m=hiscore_oldschool_hardcore_ironman",
            AccountVariant::UltimateIronman => "m=hiscore_oldschool_ultimate",
        }
    }

    /// Stable name used when persisting the variant.
    pub fn as_key(&self) -> &'static str {
        match self {
            AccountVariant::Normal => "NORMAL",
            AccountVariant::Ironman => "IRONMAN",
            AccountVariant::HardcoreIronman => "HARDCORE_IRONMAN",
            AccountVariant::UltimateIronman => "ULTIMATE_IRONMAN",
        }
    }
}

impl Display for AccountVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for AccountVariant {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_uppercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "NORMAL" | "MAIN" => Ok(AccountVariant::Normal),
            "IRONMAN" | "IRON" | "IM" => Ok(AccountVariant::Ironman),
            "HARDCORE_IRONMAN" | "HARDCORE" | "HCIM" => Ok(AccountVariant::HardcoreIronman),
            "ULTIMATE_IRONMAN" | "ULTIMATE" | "UIM" => Ok(AccountVariant::UltimateIronman),
            _ => Err(anyhow::anyhow!("Invalid account variant: {}", s)),
        }
    }
}
