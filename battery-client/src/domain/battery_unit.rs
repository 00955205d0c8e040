use std::fmt;

use serde::{Deserialize, Serialize};
use time::Date;

/// Label used wherever a category value is missing.
pub const UNKNOWN_LABEL: &str = "Unbekannt";

/// Operating status of a registered unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnitStatus {
    Operating,
    Planned,
    TemporarilyShutdown,
    PermanentlyShutdown,
}

impl UnitStatus {
    pub const ALL: [UnitStatus; 4] = [
        UnitStatus::Operating,
        UnitStatus::Planned,
        UnitStatus::TemporarilyShutdown,
        UnitStatus::PermanentlyShutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operating => "Operating",
            Self::Planned => "Planned",
            Self::TemporarilyShutdown => "TemporarilyShutdown",
            Self::PermanentlyShutdown => "PermanentlyShutdown",
        }
    }

    /// Parses the serialized variant name (`"Operating"`, ...), case-insensitive.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|s| s.as_str().eq_ignore_ascii_case(name))
    }

    /// Maps the registry's German status label (`BetriebsStatusName`).
    pub fn from_registry_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "in betrieb" => Some(Self::Operating),
            "in planung" => Some(Self::Planned),
            "vorübergehend stillgelegt" | "voruebergehend stillgelegt" => {
                Some(Self::TemporarilyShutdown)
            }
            "endgültig stillgelegt" | "endgueltig stillgelegt" => Some(Self::PermanentlyShutdown),
            _ => None,
        }
    }

    /// Maps the registry's numeric status code (`BetriebsStatusId`).
    pub fn from_registry_code(code: i64) -> Option<Self> {
        match code {
            35 => Some(Self::Operating),
            31 => Some(Self::Planned),
            37 => Some(Self::TemporarilyShutdown),
            38 => Some(Self::PermanentlyShutdown),
            _ => None,
        }
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// German federal state, plus the offshore exclusive economic zone the
/// registry files wind-adjacent storage under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Bundesland {
    #[serde(rename = "Baden-Württemberg")]
    BadenWuerttemberg,
    #[serde(rename = "Bayern")]
    Bayern,
    #[serde(rename = "Berlin")]
    Berlin,
    #[serde(rename = "Brandenburg")]
    Brandenburg,
    #[serde(rename = "Bremen")]
    Bremen,
    #[serde(rename = "Hamburg")]
    Hamburg,
    #[serde(rename = "Hessen")]
    Hessen,
    #[serde(rename = "Mecklenburg-Vorpommern")]
    MecklenburgVorpommern,
    #[serde(rename = "Niedersachsen")]
    Niedersachsen,
    #[serde(rename = "Nordrhein-Westfalen")]
    NordrheinWestfalen,
    #[serde(rename = "Rheinland-Pfalz")]
    RheinlandPfalz,
    #[serde(rename = "Saarland")]
    Saarland,
    #[serde(rename = "Sachsen")]
    Sachsen,
    #[serde(rename = "Sachsen-Anhalt")]
    SachsenAnhalt,
    #[serde(rename = "Schleswig-Holstein")]
    SchleswigHolstein,
    #[serde(rename = "Thüringen")]
    Thueringen,
    #[serde(rename = "Ausschließliche Wirtschaftszone")]
    Offshore,
}

impl Bundesland {
    pub const ALL: [Bundesland; 17] = [
        Bundesland::BadenWuerttemberg,
        Bundesland::Bayern,
        Bundesland::Berlin,
        Bundesland::Brandenburg,
        Bundesland::Bremen,
        Bundesland::Hamburg,
        Bundesland::Hessen,
        Bundesland::MecklenburgVorpommern,
        Bundesland::Niedersachsen,
        Bundesland::NordrheinWestfalen,
        Bundesland::RheinlandPfalz,
        Bundesland::Saarland,
        Bundesland::Sachsen,
        Bundesland::SachsenAnhalt,
        Bundesland::SchleswigHolstein,
        Bundesland::Thueringen,
        Bundesland::Offshore,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::BadenWuerttemberg => "Baden-Württemberg",
            Self::Bayern => "Bayern",
            Self::Berlin => "Berlin",
            Self::Brandenburg => "Brandenburg",
            Self::Bremen => "Bremen",
            Self::Hamburg => "Hamburg",
            Self::Hessen => "Hessen",
            Self::MecklenburgVorpommern => "Mecklenburg-Vorpommern",
            Self::Niedersachsen => "Niedersachsen",
            Self::NordrheinWestfalen => "Nordrhein-Westfalen",
            Self::RheinlandPfalz => "Rheinland-Pfalz",
            Self::Saarland => "Saarland",
            Self::Sachsen => "Sachsen",
            Self::SachsenAnhalt => "Sachsen-Anhalt",
            Self::SchleswigHolstein => "Schleswig-Holstein",
            Self::Thueringen => "Thüringen",
            Self::Offshore => "Ausschließliche Wirtschaftszone",
        }
    }

    /// Case-insensitive lookup that also accepts ASCII transliterations
    /// (`Thueringen`, `Baden-Wuerttemberg`).
    pub fn from_name(name: &str) -> Option<Self> {
        let wanted = fold_umlauts(name.trim());
        Self::ALL
            .into_iter()
            .find(|b| fold_umlauts(b.name()) == wanted)
    }
}

impl fmt::Display for Bundesland {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn fold_umlauts(s: &str) -> String {
    s.to_lowercase()
        .replace('ä', "ae")
        .replace('ö', "oe")
        .replace('ü', "ue")
        .replace('ß', "ss")
}

/// One battery storage unit from the registry, flattened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryUnit {
    pub unit_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub status: UnitStatus,
    pub power_kw: f64,
    pub capacity_kwh: f64,
    pub technology: String,
    pub bundesland: Option<Bundesland>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default, with = "iso_date")]
    pub commissioning_date: Option<Date>,
    #[serde(default, with = "iso_date")]
    pub planned_commissioning_date: Option<Date>,
    #[serde(default)]
    pub network_operator: String,
    #[serde(default)]
    pub municipality: Option<String>,
}

impl BatteryUnit {
    /// Hours of full-power discharge; zero when the unit reports no power.
    pub fn duration_hours(&self) -> f64 {
        if self.power_kw > 0.0 {
            self.capacity_kwh / self.power_kw
        } else {
            0.0
        }
    }

    pub fn bundesland_label(&self) -> &str {
        self.bundesland.map(|b| b.name()).unwrap_or(UNKNOWN_LABEL)
    }

    /// Both coordinates present and inside WGS84 bounds.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if valid_latitude(lat) && valid_longitude(lon) => {
                Some((lat, lon))
            }
            _ => None,
        }
    }

    pub fn power_category(&self) -> PowerCategory {
        PowerCategory::for_power_kw(self.power_kw)
    }
}

pub fn valid_latitude(lat: f64) -> bool {
    lat.is_finite() && (-90.0..=90.0).contains(&lat)
}

pub fn valid_longitude(lon: f64) -> bool {
    lon.is_finite() && (-180.0..=180.0).contains(&lon)
}

/// Size bins in MW used for the dashboard's category chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PowerCategory {
    BelowOneMw,
    OneToTenMw,
    TenToHundredMw,
    HundredToThousandMw,
    AboveThousandMw,
}

impl PowerCategory {
    /// Upper bounds are inclusive. 0 kW counts as `<1 MW` so every unit
    /// lands in exactly one bar.
    pub fn for_power_kw(power_kw: f64) -> Self {
        let mw = power_kw / 1000.0;
        if mw <= 1.0 {
            Self::BelowOneMw
        } else if mw <= 10.0 {
            Self::OneToTenMw
        } else if mw <= 100.0 {
            Self::TenToHundredMw
        } else if mw <= 1000.0 {
            Self::HundredToThousandMw
        } else {
            Self::AboveThousandMw
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::BelowOneMw => "<1 MW",
            Self::OneToTenMw => "1-10 MW",
            Self::TenToHundredMw => "10-100 MW",
            Self::HundredToThousandMw => "100-1000 MW",
            Self::AboveThousandMw => ">1000 MW",
        }
    }
}

/// `YYYY-MM-DD` encoding for optional dates.
pub mod iso_date {
    use serde::{Deserialize, Deserializer, Serializer};
    use time::{format_description::FormatItem, macros::format_description, Date};

    const FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

    pub fn serialize<S: Serializer>(value: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(date) => {
                let s = date.format(FORMAT).map_err(serde::ser::Error::custom)?;
                serializer.serialize_some(&s)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Date>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| Date::parse(&s, FORMAT).map_err(serde::de::Error::custom))
            .transpose()
    }

    pub fn parse(s: &str) -> Option<Date> {
        Date::parse(s, FORMAT).ok()
    }
}
