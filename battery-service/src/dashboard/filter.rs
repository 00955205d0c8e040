use std::{collections::BTreeSet, fmt};

use battery_client::domain::{BatteryUnit, UnitStatus};

/// Sentinel accepted wherever a single-value selection can be disabled.
pub const ALL: &str = "All";

/// Option label standing for an empty owner or network operator.
pub const UNSPECIFIED: &str = "(ohne Angabe)";

/// Numeric dimension a range filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Power,
    Capacity,
    Duration,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Power => "power_kw",
            Self::Capacity => "capacity_kwh",
            Self::Duration => "duration_hours",
        })
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FilterRangeError {
    #[error("{dimension} range is inverted: {lo} > {hi}")]
    Inverted { dimension: Dimension, lo: f64, hi: f64 },
    #[error("{dimension} range bound is not a number")]
    NotANumber { dimension: Dimension },
}

/// Closed interval `[lo, hi]`. Only constructible in a valid state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFilter {
    lo: f64,
    hi: f64,
}

impl RangeFilter {
    pub fn new(dimension: Dimension, lo: f64, hi: f64) -> Result<Self, FilterRangeError> {
        if lo.is_nan() || hi.is_nan() {
            return Err(FilterRangeError::NotANumber { dimension });
        }
        if lo > hi {
            return Err(FilterRangeError::Inverted { dimension, lo, hi });
        }
        Ok(Self { lo, hi })
    }

    pub fn unbounded() -> Self {
        Self {
            lo: f64::NEG_INFINITY,
            hi: f64::INFINITY,
        }
    }

    pub fn lo(&self) -> f64 {
        self.lo
    }

    pub fn hi(&self) -> f64 {
        self.hi
    }

    pub fn contains(&self, v: f64) -> bool {
        self.lo <= v && v <= self.hi
    }
}

impl Default for RangeFilter {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// "All", or exactly one category value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    All,
    Only(String),
}

impl Selection {
    /// `None`, empty and `"All"` select everything.
    pub fn from_param(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            None | Some("") => Self::All,
            Some(v) if v == ALL => Self::All,
            Some(v) => Self::Only(v.to_string()),
        }
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::All => true,
            Self::Only(wanted) => wanted == value || (value.is_empty() && wanted == UNSPECIFIED),
        }
    }
}

/// Current value of every dashboard control. Lives only as long as one
/// session's request; never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterState {
    pub statuses: BTreeSet<UnitStatus>,
    pub power: RangeFilter,
    pub capacity: RangeFilter,
    pub duration: RangeFilter,
    pub bundesland: Selection,
    pub owner: Selection,
    pub technology: Selection,
    pub network_operator: Selection,
}

impl Default for FilterState {
    fn default() -> Self {
        Self {
            statuses: UnitStatus::ALL.into_iter().collect(),
            power: RangeFilter::unbounded(),
            capacity: RangeFilter::unbounded(),
            duration: RangeFilter::unbounded(),
            bundesland: Selection::All,
            owner: Selection::All,
            technology: Selection::All,
            network_operator: Selection::All,
        }
    }
}

/// One user interaction with a filter control.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterEvent {
    SetStatuses(BTreeSet<UnitStatus>),
    SetPowerRange { lo: f64, hi: f64 },
    SetCapacityRange { lo: f64, hi: f64 },
    SetDurationRange { lo: f64, hi: f64 },
    SelectBundesland(Selection),
    SelectOwner(Selection),
    SelectTechnology(Selection),
    SelectNetworkOperator(Selection),
    Reset,
}

impl FilterState {
    /// Applies one event. An invalid range leaves the state unchanged.
    pub fn apply(&mut self, event: FilterEvent) -> Result<(), FilterRangeError> {
        match event {
            FilterEvent::SetStatuses(statuses) => self.statuses = statuses,
            FilterEvent::SetPowerRange { lo, hi } => {
                self.power = RangeFilter::new(Dimension::Power, lo, hi)?
            }
            FilterEvent::SetCapacityRange { lo, hi } => {
                self.capacity = RangeFilter::new(Dimension::Capacity, lo, hi)?
            }
            FilterEvent::SetDurationRange { lo, hi } => {
                self.duration = RangeFilter::new(Dimension::Duration, lo, hi)?
            }
            FilterEvent::SelectBundesland(s) => self.bundesland = s,
            FilterEvent::SelectOwner(s) => self.owner = s,
            FilterEvent::SelectTechnology(s) => self.technology = s,
            FilterEvent::SelectNetworkOperator(s) => self.network_operator = s,
            FilterEvent::Reset => *self = Self::default(),
        }
        Ok(())
    }

    /// Logical AND of every active predicate.
    pub fn matches(&self, unit: &BatteryUnit) -> bool {
        self.statuses.contains(&unit.status)
            && self.power.contains(unit.power_kw)
            && self.capacity.contains(unit.capacity_kwh)
            && self.duration.contains(unit.duration_hours())
            && self.bundesland.matches(unit.bundesland_label())
            && self.owner.matches(&unit.owner)
            && self.technology.matches(&unit.technology)
            && self.network_operator.matches(&unit.network_operator)
    }
}
