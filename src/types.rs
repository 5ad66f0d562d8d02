//! Shared types for the DRAWHOUSE wagering core.
//!
//! These types form the data model used across all modules: money,
//! bet types, draws, bets, exposure keys, months and the domain error.
//! They sit at the bottom of the dependency graph so that the pool,
//! risk and engine modules can use them without circular references.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Fixed-point amount in the smallest currency unit (6 decimals, USDT).
pub type Amount = i64;

/// Number of decimals carried by [`Amount`].
pub const AMOUNT_DECIMALS: u32 = 6;

/// One whole currency unit expressed in smallest units.
pub const AMOUNT_SCALE: Amount = 1_000_000;

/// Render an amount with its full 6-decimal precision, e.g. `12.500000`.
pub fn format_amount(amount: Amount) -> String {
    Decimal::new(amount, AMOUNT_DECIMALS).to_string()
}

/// Multiply an amount by a ratio, flooring to the smallest unit.
///
/// Returns `None` if the product does not fit in an [`Amount`].
pub fn apply_ratio(amount: Amount, ratio: Decimal) -> Option<Amount> {
    Decimal::from(amount).checked_mul(ratio)?.floor().to_i64()
}

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Draw identifier. A draw is also the settlement period for exposure.
pub type DrawId = u64;

/// Bet identifier.
pub type BetId = Uuid;

// ---------------------------------------------------------------------------
// Bet type
// ---------------------------------------------------------------------------

/// Game variant a bet is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    TwoDigit,
    ThreeDigit,
    FourDigit,
}

impl BetType {
    /// All bet types, in table order.
    pub const ALL: [BetType; 3] = [BetType::TwoDigit, BetType::ThreeDigit, BetType::FourDigit];

    /// Fixed payout multiplier for a winning bet.
    pub fn multiplier(self) -> Amount {
        match self {
            BetType::TwoDigit => 65,
            BetType::ThreeDigit => 300,
            BetType::FourDigit => 1500,
        }
    }

    /// Largest number that can be chosen for this bet type.
    pub fn max_number(self) -> u16 {
        match self {
            BetType::TwoDigit => 99,
            BetType::ThreeDigit => 999,
            BetType::FourDigit => 9999,
        }
    }

    /// Position of this bet type in [`BetType::ALL`].
    pub fn index(self) -> usize {
        match self {
            BetType::TwoDigit => 0,
            BetType::ThreeDigit => 1,
            BetType::FourDigit => 2,
        }
    }

    /// Reject numbers outside the range of this bet type.
    pub fn validate_number(self, number: u16) -> HouseResult<()> {
        if number > self.max_number() {
            return Err(HouseError::InvalidNumber {
                bet_type: self,
                number,
                max: self.max_number(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetType::TwoDigit => write!(f, "2D"),
            BetType::ThreeDigit => write!(f, "3D"),
            BetType::FourDigit => write!(f, "4D"),
        }
    }
}

/// Parse a bet type (case-insensitive), accepting both `two_digit` and `2d`.
impl std::str::FromStr for BetType {
    type Err = HouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "two_digit" | "2d" | "2" => Ok(BetType::TwoDigit),
            "three_digit" | "3d" | "3" => Ok(BetType::ThreeDigit),
            "four_digit" | "4d" | "4" => Ok(BetType::FourDigit),
            _ => Err(HouseError::UnknownBetType(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Draw lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrawStatus {
    Scheduled,
    Open,
    Closed,
    Completed,
    Cancelled,
}

impl DrawStatus {
    /// Completed and Cancelled draws never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, DrawStatus::Completed | DrawStatus::Cancelled)
    }
}

impl fmt::Display for DrawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrawStatus::Scheduled => write!(f, "Scheduled"),
            DrawStatus::Open => write!(f, "Open"),
            DrawStatus::Closed => write!(f, "Closed"),
            DrawStatus::Completed => write!(f, "Completed"),
            DrawStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Resolution status of a single bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
    Refunded,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "PENDING"),
            BetStatus::Won => write!(f, "WON"),
            BetStatus::Lost => write!(f, "LOST"),
            BetStatus::Refunded => write!(f, "REFUNDED"),
        }
    }
}

// ---------------------------------------------------------------------------
// Winning numbers
// ---------------------------------------------------------------------------

/// Official result of a draw: one winning value per bet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinningNumbers {
    pub two_digit: u16,
    pub three_digit: u16,
    pub four_digit: u16,
}

impl WinningNumbers {
    /// Derive all bet-type results from a single drawn 4-digit number:
    /// the 2- and 3-digit results are its trailing digits.
    pub fn from_draw(drawn: u16) -> HouseResult<Self> {
        BetType::FourDigit.validate_number(drawn)?;
        Ok(Self {
            two_digit: drawn % 100,
            three_digit: drawn % 1000,
            four_digit: drawn,
        })
    }

    /// Winning value for a bet type.
    pub fn for_type(&self, bet_type: BetType) -> u16 {
        match bet_type {
            BetType::TwoDigit => self.two_digit,
            BetType::ThreeDigit => self.three_digit,
            BetType::FourDigit => self.four_digit,
        }
    }

    pub fn validate(&self) -> HouseResult<()> {
        for bet_type in BetType::ALL {
            bet_type.validate_number(self.for_type(bet_type))?;
        }
        Ok(())
    }
}

impl fmt::Display for WinningNumbers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "2D={:02} 3D={:03} 4D={:04}",
            self.two_digit, self.three_digit, self.four_digit
        )
    }
}

// ---------------------------------------------------------------------------
// Draw
// ---------------------------------------------------------------------------

/// A scheduled draw. Mutated only through lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Draw {
    pub id: DrawId,
    pub sequence: u64,
    /// Close time: betting stops at this instant.
    pub scheduled_time: DateTime<Utc>,
    pub status: DrawStatus,
    /// Set once on completion, immutable after.
    pub winning: Option<WinningNumbers>,
    pub total_stake: Amount,
    pub total_paid_out: Amount,
    pub bet_count: u64,
    pub created_at: DateTime<Utc>,
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Draw {
    pub fn new(id: DrawId, sequence: u64, scheduled_time: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            sequence,
            scheduled_time,
            status: DrawStatus::Scheduled,
            winning: None,
            total_stake: 0,
            total_paid_out: 0,
            bet_count: 0,
            created_at: now,
            opened_at: None,
            closed_at: None,
            settled_at: None,
            cancelled_at: None,
        }
    }

    /// Whether bets may be admitted at `now`.
    pub fn is_accepting(&self, now: DateTime<Utc>) -> bool {
        self.status == DrawStatus::Open && now < self.scheduled_time
    }
}

impl fmt::Display for Draw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Draw #{} [{}] closes {} | bets={} stake={} paid={}",
            self.id,
            self.status,
            self.scheduled_time.to_rfc3339(),
            self.bet_count,
            format_amount(self.total_stake),
            format_amount(self.total_paid_out),
        )
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A single accepted wager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub draw_id: DrawId,
    pub bet_type: BetType,
    pub number: u16,
    pub stake: Amount,
    pub multiplier: Amount,
    pub status: BetStatus,
    pub payout: Amount,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn new(
        draw_id: DrawId,
        bet_type: BetType,
        number: u16,
        stake: Amount,
        placed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            draw_id,
            bet_type,
            number,
            stake,
            multiplier: bet_type.multiplier(),
            status: BetStatus::Pending,
            payout: 0,
            placed_at,
        }
    }

    /// What the house owes if this bet wins.
    pub fn liability(&self) -> Amount {
        self.stake.saturating_mul(self.multiplier)
    }

    pub fn exposure_key(&self) -> ExposureKey {
        ExposureKey {
            draw_id: self.draw_id,
            bet_type: self.bet_type,
            number: self.number,
        }
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] draw #{} {} {} stake={} x{} payout={}",
            self.status,
            self.draw_id,
            self.bet_type,
            self.number,
            format_amount(self.stake),
            self.multiplier,
            format_amount(self.payout),
        )
    }
}

// ---------------------------------------------------------------------------
// Exposure key
// ---------------------------------------------------------------------------

/// Composite key of an exposure record. Ordering is used for lock ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExposureKey {
    pub draw_id: DrawId,
    pub bet_type: BetType,
    pub number: u16,
}

impl fmt::Display for ExposureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "draw #{} {} {}", self.draw_id, self.bet_type, self.number)
    }
}

// ---------------------------------------------------------------------------
// Month
// ---------------------------------------------------------------------------

/// Calendar month used for commission accounting, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct MonthId {
    pub year: i32,
    pub month: u32,
}

impl MonthId {
    pub fn new(year: i32, month: u32) -> HouseResult<Self> {
        if !(1..=9999).contains(&year) || !(1..=12).contains(&month) {
            return Err(HouseError::InvalidMonth(format!("{year}-{month}")));
        }
        Ok(Self { year, month })
    }

    /// Month containing the given instant.
    pub fn of(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    /// The following month, or `None` past the last representable year.
    pub fn next(self) -> Option<Self> {
        if self.month == 12 {
            Some(Self { year: self.year.checked_add(1)?, month: 1 })
        } else {
            Some(Self { year: self.year, month: self.month + 1 })
        }
    }

    /// First instant of the month.
    pub fn start(self) -> Option<DateTime<Utc>> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0).single()
    }

    /// A month has fully closed once the next month has started.
    pub fn has_ended(self, now: DateTime<Utc>) -> bool {
        self.next()
            .and_then(MonthId::start)
            .map(|end| now >= end)
            .unwrap_or(false)
    }
}

impl fmt::Display for MonthId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl std::str::FromStr for MonthId {
    type Err = HouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || HouseError::InvalidMonth(s.to_string());
        let (year, month) = s.split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        MonthId::new(year, month)
    }
}

impl From<MonthId> for String {
    fn from(month: MonthId) -> Self {
        month.to_string()
    }
}

impl TryFrom<String> for MonthId {
    type Error = HouseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

pub type HouseResult<T> = Result<T, HouseError>;

/// Domain errors returned by every core operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HouseError {
    #[error("Stake {stake} outside allowed range [{min}, {max}]")]
    InvalidStakeAmount { stake: Amount, min: Amount, max: Amount },

    #[error("Number {number} out of range for {bet_type} (max {max})")]
    InvalidNumber { bet_type: BetType, number: u16, max: u16 },

    #[error("Unknown bet type: {0}")]
    UnknownBetType(String),

    #[error("Exposure limit exceeded on {key}: projected liability {projected} > cap {cap} (max allowed stake {max_allowed_stake})")]
    ExposureLimitExceeded {
        key: ExposureKey,
        projected: Amount,
        cap: Amount,
        max_allowed_stake: Amount,
    },

    #[error("Batch rejected at bet #{index}: {reason}")]
    BatchRejected { index: usize, reason: Box<HouseError> },

    #[error("Batch contains no bets")]
    EmptyBatch,

    #[error("Draw #{draw_id}: invalid transition {from} -> {to}")]
    InvalidStateTransition { draw_id: DrawId, from: DrawStatus, to: DrawStatus },

    #[error("Draw #{draw_id} is not accepting bets (status {status})")]
    DrawNotOpen { draw_id: DrawId, status: DrawStatus },

    #[error("Draw not found: #{0}")]
    DrawNotFound(DrawId),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Insufficient bankroll: requested {requested}, available {available}")]
    InsufficientBankroll { requested: Amount, available: Amount },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Amount),

    #[error("Draw #{0} already settled with different results")]
    AlreadySettled(DrawId),

    #[error("Commission for {0} already calculated")]
    AlreadyCalculated(MonthId),

    #[error("Month {0} has not closed yet")]
    MonthNotClosed(MonthId),

    #[error("Invalid month: {0}")]
    InvalidMonth(String),

    #[error("No operator fees to withdraw")]
    NothingToWithdraw,

    #[error("Invalid risk parameters: {0}")]
    InvalidRiskParameters(String),

    #[error("Amount arithmetic overflow")]
    AmountOverflow,
}

impl HouseError {
    /// Stable machine-readable name, used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            HouseError::InvalidStakeAmount { .. } => "InvalidStakeAmount",
            HouseError::InvalidNumber { .. } => "InvalidNumber",
            HouseError::UnknownBetType(_) => "UnknownBetType",
            HouseError::ExposureLimitExceeded { .. } => "ExposureLimitExceeded",
            HouseError::BatchRejected { .. } => "BatchRejected",
            HouseError::EmptyBatch => "EmptyBatch",
            HouseError::InvalidStateTransition { .. } => "InvalidStateTransition",
            HouseError::DrawNotOpen { .. } => "DrawNotOpen",
            HouseError::DrawNotFound(_) => "DrawNotFound",
            HouseError::InvalidSchedule(_) => "InvalidSchedule",
            HouseError::InsufficientBankroll { .. } => "InsufficientBankroll",
            HouseError::InvalidAmount(_) => "InvalidAmount",
            HouseError::AlreadySettled(_) => "AlreadySettled",
            HouseError::AlreadyCalculated(_) => "AlreadyCalculated",
            HouseError::MonthNotClosed(_) => "MonthNotClosed",
            HouseError::InvalidMonth(_) => "InvalidMonth",
            HouseError::NothingToWithdraw => "NothingToWithdraw",
            HouseError::InvalidRiskParameters(_) => "InvalidRiskParameters",
            HouseError::AmountOverflow => "AmountOverflow",
        }
    }

    /// Suggested reduced stake, if this error carries one.
    pub fn max_allowed_stake(&self) -> Option<Amount> {
        match self {
            HouseError::ExposureLimitExceeded { max_allowed_stake, .. } => Some(*max_allowed_stake),
            HouseError::BatchRejected { reason, .. } => reason.max_allowed_stake(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
