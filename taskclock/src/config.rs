use anyhow::{Context, Result};
use ratatui::style::Color;
use serde::Deserialize;
use std::path::Path;
use taskclock_core::settings::{self, Settings};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub settings: Settings,
    pub theme: Theme,
    pub icons: Icons,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Theme {
    #[serde(deserialize_with = "hex_to_color")]
    pub background: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub foreground: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub selection: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub black: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub red: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub green: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub yellow: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub blue: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub magenta: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub cyan: Color,
    #[serde(deserialize_with = "hex_to_color")]
    pub gray: Color,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Icons {
    pub task_list: String,
    pub running: String,
    pub idle: String,
    pub finished: String,
    pub failed: String,
    pub pending: String,
    pub done: String,
    pub select: String,
    pub input_cursor: String,
    pub separator: String,
    pub header_left: String,
    pub header_right: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            background: Color::Rgb(9, 14, 19),
            foreground: Color::Rgb(197, 201, 199),
            selection: Color::Rgb(230, 195, 132),
            black: Color::Rgb(13, 12, 12),
            red: Color::Rgb(228, 104, 118),
            green: Color::Rgb(138, 154, 123),
            yellow: Color::Rgb(196, 178, 138),
            blue: Color::Rgb(127, 180, 202),
            magenta: Color::Rgb(162, 146, 163),
            cyan: Color::Rgb(122, 168, 159),
            gray: Color::Rgb(164, 167, 164),
        }
    }
}

impl Default for Icons {
    fn default() -> Self {
        Self {
            task_list: "⬢".to_string(),
            running: "▶".to_string(),
            idle: "■".to_string(),
            finished: "✔".to_string(),
            failed: "✖".to_string(),
            pending: "☐".to_string(),
            done: "☑".to_string(),
            select: "▸".to_string(),
            input_cursor: "▊".to_string(),
            separator: "│".to_string(),
            header_left: "⟪ ".to_string(),
            header_right: " ⟫".to_string(),
        }
    }
}

fn hex_to_color<'de, D>(deserializer: D) -> Result<Color, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s: String = serde::Deserialize::deserialize(deserializer)?;
    if !s.starts_with('#') || s.len() != 7 {
        return Err(serde::de::Error::custom("invalid hex color format"));
    }
    let r = u8::from_str_radix(&s[1..3], 16).map_err(serde::de::Error::custom)?;
    let g = u8::from_str_radix(&s[3..5], 16).map_err(serde::de::Error::custom)?;
    let b = u8::from_str_radix(&s[5..7], 16).map_err(serde::de::Error::custom)?;
    Ok(Color::Rgb(r, g, b))
}

pub fn load_config() -> Result<Config> {
    let mut config = match settings::config_path() {
        Some(path) => load_from(&path)?,
        None => Config::default(),
    };
    config.settings.apply_env();
    Ok(config)
}

pub fn load_from(path: &Path) -> Result<Config> {
    settings::read_toml(path)
        .with_context(|| format!("Failed to load config file at {:?}", path))
}
