use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Theme {
    pub background: String,
    pub grid_color: String,
    pub grid_opacity: f32,
    pub grid_spacing: u32,
    pub axis_color: String,
    pub axis_opacity: f32,
    pub center_color: String,
    pub marker_color: String,
    pub divider_color: String,
}

impl Theme {
    pub fn classic() -> Self {
        Self {
            background: "#FFFFFF".to_string(),
            grid_color: "#C8C8C8".to_string(),
            grid_opacity: 0.4,
            grid_spacing: 50,
            axis_color: "#FF0000".to_string(),
            axis_opacity: 0.7,
            center_color: "#00FF00".to_string(),
            marker_color: "#0050FF".to_string(),
            divider_color: "#C8C8C8".to_string(),
        }
    }

    pub fn background_rgb(&self) -> [u8; 3] {
        parse_hex_rgb(&self.background).unwrap_or([255, 255, 255])
    }

    pub fn divider_rgb(&self) -> [u8; 3] {
        parse_hex_rgb(&self.divider_color).unwrap_or([200, 200, 200])
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::classic()
    }
}

/// Parses `#RGB` or `#RRGGBB`.
pub fn parse_hex_rgb(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().strip_prefix('#')?;
    if !hex.is_ascii() {
        return None;
    }
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (idx, ch) in hex.chars().enumerate() {
                let v = ch.to_digit(16)? as u8;
                out[idx] = v * 16 + v;
            }
            Some(out)
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
            let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
            let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
            Some([r, g, b])
        }
        _ => None,
    }
}
