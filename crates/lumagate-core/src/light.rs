//! Light domain types.

use serde::{Deserialize, Serialize};

/// Device identifier as known to the upstream API.
pub type DeviceId = String;

/// Power state of a light.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PowerState::On => "on",
            PowerState::Off => "off",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "1" => Ok(PowerState::On),
            "off" | "false" | "0" => Ok(PowerState::Off),
            other => Err(format!("invalid power state '{}', expected on or off", other)),
        }
    }
}

/// 24-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

/// Parses `#rrggbb`, `rrggbb` or `r,g,b`.
impl std::str::FromStr for Rgb {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(',') {
            let parts: Vec<&str> = s.split(',').map(str::trim).collect();
            if let [r, g, b] = parts.as_slice() {
                let channel = |v: &str| {
                    v.parse::<u8>()
                        .map_err(|_| format!("invalid color channel '{}'", v))
                };
                return Ok(Rgb::new(channel(*r)?, channel(*g)?, channel(*b)?));
            }
            return Err(format!("invalid color '{}', expected r,g,b", s));
        }

        let hex = s.strip_prefix('#').unwrap_or(s);
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(format!("invalid color '{}', expected #rrggbb", s));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| format!("invalid color '{}'", s))
        };
        Ok(Rgb::new(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }
}

/// Kind of a control action. Commands only coalesce within the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Turn,
    Brightness,
    Color,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Turn => "turn",
            ActionKind::Brightness => "brightness",
            ActionKind::Color => "color",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control action with its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "value", rename_all = "lowercase")]
pub enum LightAction {
    /// Power on/off.
    Turn(PowerState),
    /// Brightness percentage, 0-100.
    Brightness(u8),
    /// RGB color.
    Color(Rgb),
}

impl LightAction {
    /// Maximum accepted brightness value.
    pub const MAX_BRIGHTNESS: u8 = 100;

    pub fn kind(&self) -> ActionKind {
        match self {
            LightAction::Turn(_) => ActionKind::Turn,
            LightAction::Brightness(_) => ActionKind::Brightness,
            LightAction::Color(_) => ActionKind::Color,
        }
    }
}

impl std::fmt::Display for LightAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LightAction::Turn(power) => write!(f, "turn={}", power),
            LightAction::Brightness(level) => write!(f, "brightness={}", level),
            LightAction::Color(rgb) => write!(f, "color={}", rgb),
        }
    }
}

/// A light as listed by the upstream API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightDevice {
    pub id: DeviceId,
    pub model: String,
    pub name: String,
    pub controllable: bool,
    pub retrievable: bool,
    pub supported_commands: Vec<ActionKind>,
}

impl LightDevice {
    pub fn supports(&self, kind: ActionKind) -> bool {
        self.supported_commands.contains(&kind)
    }
}

/// Current state of a light.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightState {
    pub id: DeviceId,
    pub model: String,
    pub online: bool,
    pub power: PowerState,
    pub brightness: u8,
    pub color: Rgb,
}

impl LightState {
    /// Apply an action to this state.
    pub fn apply(&mut self, action: &LightAction) {
        match *action {
            LightAction::Turn(power) => self.power = power,
            LightAction::Brightness(level) => self.brightness = level,
            LightAction::Color(rgb) => self.color = rgb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_kind() {
        assert_eq!(LightAction::Turn(PowerState::On).kind(), ActionKind::Turn);
        assert_eq!(LightAction::Brightness(10).kind(), ActionKind::Brightness);
        assert_eq!(LightAction::Color(Rgb::new(1, 2, 3)).kind(), ActionKind::Color);
    }

    #[test]
    fn test_power_state_parse() {
        assert_eq!("ON".parse::<PowerState>(), Ok(PowerState::On));
        assert_eq!("off".parse::<PowerState>(), Ok(PowerState::Off));
        assert!("dim".parse::<PowerState>().is_err());
    }

    #[test]
    fn test_rgb_parse() {
        assert_eq!("#ff8000".parse::<Rgb>(), Ok(Rgb::new(255, 128, 0)));
        assert_eq!("00FF10".parse::<Rgb>(), Ok(Rgb::new(0, 255, 16)));
        assert_eq!("10, 20,30".parse::<Rgb>(), Ok(Rgb::new(10, 20, 30)));
        assert!("#fff".parse::<Rgb>().is_err());
        assert!("256,0,0".parse::<Rgb>().is_err());
        assert!("1,2".parse::<Rgb>().is_err());
        assert_eq!(Rgb::new(255, 128, 0).to_string(), "#ff8000");
    }

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_value(LightAction::Brightness(75)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "brightness", "value": 75}));

        let json = serde_json::to_value(LightAction::Turn(PowerState::On)).unwrap();
        assert_eq!(json, serde_json::json!({"name": "turn", "value": "on"}));
    }

    #[test]
    fn test_state_apply() {
        let mut state = LightState {
            id: "lamp".to_string(),
            model: "H6008".to_string(),
            online: true,
            power: PowerState::Off,
            brightness: 0,
            color: Rgb::new(0, 0, 0),
        };
        state.apply(&LightAction::Turn(PowerState::On));
        state.apply(&LightAction::Color(Rgb::new(255, 128, 0)));
        assert_eq!(state.power, PowerState::On);
        assert_eq!(state.color.to_string(), "#ff8000");
    }
}
