//! Equipment kinds and raw type-string normalization.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Boiler,
    Pump,
    Chiller,
    AirHandler,
    FanCoil,
    Doas,
    StagedHeatPump,
    /// Monitoring only; no control function.
    MechanicalRoom,
    /// Monitoring only; no control function.
    SteamBundle,
}

impl Kind {
    pub const ALL: [Kind; 9] = [
        Kind::Boiler,
        Kind::Pump,
        Kind::Chiller,
        Kind::AirHandler,
        Kind::FanCoil,
        Kind::Doas,
        Kind::StagedHeatPump,
        Kind::MechanicalRoom,
        Kind::SteamBundle,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Boiler => "boiler",
            Kind::Pump => "pump",
            Kind::Chiller => "chiller",
            Kind::AirHandler => "air-handler",
            Kind::FanCoil => "fan-coil",
            Kind::Doas => "doas",
            Kind::StagedHeatPump => "staged-heat-pump",
            Kind::MechanicalRoom => "mechanical-room",
            Kind::SteamBundle => "steam-bundle",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = String;

    /// Accepts canonical names and anything `normalize_type` understands.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Kind::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .or_else(|| normalize_type(s))
            .ok_or_else(|| format!("unknown equipment kind '{s}'"))
    }
}

/// Lowercased alphanumerics with trailing unit numbers dropped ("HW Pump 2" -> "hwpump").
pub fn fold_type(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    let trimmed = folded.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        folded
    } else {
        trimmed.to_string()
    }
}

const SYNONYMS: &[(&str, Kind)] = &[
    ("hwpump", Kind::Pump),
    ("hotwaterpump", Kind::Pump),
    ("hotwater", Kind::Pump),
    ("hotwatercirculator", Kind::Pump),
    ("cwpump", Kind::Pump),
    ("chwpump", Kind::Pump),
    ("chilledwaterpump", Kind::Pump),
    ("condenserpump", Kind::Pump),
    ("circpump", Kind::Pump),
    ("comfortboiler", Kind::Boiler),
    ("domesticboiler", Kind::Boiler),
    ("dhwboiler", Kind::Boiler),
    ("ahu", Kind::AirHandler),
    ("airhandler", Kind::AirHandler),
    ("airhandlingunit", Kind::AirHandler),
    ("fcu", Kind::FanCoil),
    ("fancoil", Kind::FanCoil),
    ("fancoilunit", Kind::FanCoil),
    ("doas", Kind::Doas),
    ("dedicatedoutdoorair", Kind::Doas),
    ("dedicatedoutdoorairsystem", Kind::Doas),
    ("geo", Kind::StagedHeatPump),
    ("geothermal", Kind::StagedHeatPump),
    ("heatpump", Kind::StagedHeatPump),
    ("wshp", Kind::StagedHeatPump),
    ("waterheatpump", Kind::StagedHeatPump),
    ("mechroom", Kind::MechanicalRoom),
    ("mechanicalroom", Kind::MechanicalRoom),
    ("steambundle", Kind::SteamBundle),
    ("chiller", Kind::Chiller),
];

/// Canonical kind for a raw directory type string, or `None` when unsupported.
pub fn normalize_type(raw: &str) -> Option<Kind> {
    let t = fold_type(raw);
    if t.is_empty() {
        return None;
    }
    if let Some((_, k)) = SYNONYMS.iter().find(|(s, _)| *s == t) {
        return Some(*k);
    }
    let kind = if t.contains("boiler") {
        Kind::Boiler
    } else if t.contains("heatpump") || t.starts_with("geo") {
        Kind::StagedHeatPump
    } else if t.ends_with("pump") {
        Kind::Pump
    } else if t.contains("chiller") {
        Kind::Chiller
    } else if t.contains("airhandler") || t.starts_with("ahu") {
        Kind::AirHandler
    } else if t.contains("fancoil") || t.starts_with("fcu") {
        Kind::FanCoil
    } else if t.contains("doas") {
        Kind::Doas
    } else if t.contains("mechanical") {
        Kind::MechanicalRoom
    } else if t.contains("steam") {
        Kind::SteamBundle
    } else {
        return None;
    };
    Some(kind)
}
