use std::fmt::{Display, Formatter};
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use ethabi::{Address, Uint};

pub type TxHash = String;

pub const TOKEN_DECIMALS: usize = 18;
pub const TOP_RIGHT: &str = "topR";

/// Local copy of the on-chain lottery and token state. Populated once by
/// `Dashboard::initialize` and partially refreshed after each write action;
/// the contract is the sole source of truth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub bets_open: bool,
    pub bets_closing_time: String,
    pub bet_price: String,
    pub bet_fee: String,
    pub purchase_ratio: String,
    pub prize_pool: String,
    pub owner_pool: String,
    pub account_prize: String,
    pub account_balance: String,
    pub token_name: String,
    pub token_symbol: String,
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{}",
            if self.bets_open {
                "Lottery is open"
            } else {
                "Lottery is closed"
            }
        )?;
        writeln!(f, "Bets closing time: {}", self.bets_closing_time)?;
        writeln!(f, "Bet price: {} {}", self.bet_price, self.token_symbol)?;
        writeln!(f, "Bet fee: {} {}", self.bet_fee, self.token_symbol)?;
        writeln!(f, "Purchase ratio: {}", self.purchase_ratio)?;
        writeln!(f, "Prize pool: {} {}", self.prize_pool, self.token_symbol)?;
        writeln!(f, "Owner pool: {} {}", self.owner_pool, self.token_symbol)?;
        writeln!(f, "Your prize: {} {}", self.account_prize, self.token_symbol)?;
        writeln!(
            f,
            "Your balance: {} {}",
            self.account_balance, self.token_symbol
        )?;
        write!(f, "Token: {} ({})", self.token_name, self.token_symbol)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub position: &'static str,
}

pub fn parse_address(s: &str) -> Result<Address> {
    let trimmed = s.trim().trim_start_matches("0x");
    Address::from_str(trimmed).map_err(|e| anyhow!("invalid address {}: {}", s, e))
}

/// Renders an 18-decimal base-unit amount as a decimal string.
pub fn format_units(amount: Uint) -> String {
    let scale = Uint::exp10(TOKEN_DECIMALS);
    let whole = amount / scale;
    let frac = amount % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let mut frac = frac.to_string();
    while frac.len() < TOKEN_DECIMALS {
        frac.insert(0, '0');
    }
    format!("{}.{}", whole, frac.trim_end_matches('0'))
}

/// Parses a decimal string into 18-decimal base units.
pub fn parse_units(s: &str) -> Result<Uint> {
    let s = s.trim();
    if s.is_empty() {
        bail!("amount is empty");
    }
    let (whole, frac) = match s.split_once('.') {
        Some((whole, frac)) => (whole, frac),
        None => (s, ""),
    };
    if frac.len() > TOKEN_DECIMALS {
        bail!(
            "amount {} has more than {} decimal places",
            s,
            TOKEN_DECIMALS
        );
    }
    let whole = if whole.is_empty() {
        Uint::zero()
    } else {
        Uint::from_dec_str(whole).map_err(|e| anyhow!("invalid amount {}: {}", s, e))?
    };
    let mut padded = frac.to_string();
    while padded.len() < TOKEN_DECIMALS {
        padded.push('0');
    }
    let frac = Uint::from_dec_str(&padded).map_err(|e| anyhow!("invalid amount {}: {}", s, e))?;
    whole
        .checked_mul(Uint::exp10(TOKEN_DECIMALS))
        .and_then(|scaled| scaled.checked_add(frac))
        .ok_or_else(|| anyhow!("amount {} does not fit in 256 bits", s))
}
