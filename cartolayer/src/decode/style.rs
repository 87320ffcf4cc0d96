//! Style rules for vector tile rasterization.
//!
//! A [`StyleSheet`] is an ordered list of paint rules; definition order is
//! paint order, so later layers draw on top.

use serde::{Deserialize, Serialize};

/// How a style layer paints its features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleKind {
    /// Filled polygons.
    Fill,
    /// Stroked lines (also outlines polygons).
    Line,
    /// Point markers.
    Symbol,
}

/// One paint rule, matched to a geometry layer by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleLayer {
    /// Geometry layer this rule applies to.
    pub layer: String,
    pub kind: StyleKind,
    /// Fill color as `#rrggbb` or `#rrggbbaa`.
    #[serde(default = "default_fill_color")]
    pub fill_color: String,
    /// Stroke color as `#rrggbb` or `#rrggbbaa`.
    #[serde(default = "default_stroke_color")]
    pub stroke_color: String,
    /// Stroke width in canvas units.
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f32,
}

fn default_fill_color() -> String {
    "#c8c8c8".into()
}

fn default_stroke_color() -> String {
    "#787878".into()
}

fn default_stroke_width() -> f32 {
    1.0
}

/// Ordered set of paint rules.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleSheet {
    pub layers: Vec<StyleLayer>,
}

impl StyleSheet {
    /// A reasonable default style: water and parks filled, roads stroked,
    /// buildings filled, POIs as symbols.
    pub fn basic() -> Self {
        Self {
            layers: vec![
                StyleLayer {
                    layer: "water".into(),
                    kind: StyleKind::Fill,
                    fill_color: "#aad3df".into(),
                    stroke_color: default_stroke_color(),
                    stroke_width: 0.0,
                },
                StyleLayer {
                    layer: "parks".into(),
                    kind: StyleKind::Fill,
                    fill_color: "#c8e6c9".into(),
                    stroke_color: default_stroke_color(),
                    stroke_width: 0.0,
                },
                StyleLayer {
                    layer: "roads".into(),
                    kind: StyleKind::Line,
                    fill_color: default_fill_color(),
                    stroke_color: "#ffffff".into(),
                    stroke_width: 2.0,
                },
                StyleLayer {
                    layer: "buildings".into(),
                    kind: StyleKind::Fill,
                    fill_color: "#d9d0c9".into(),
                    stroke_color: "#b5a99c".into(),
                    stroke_width: 0.5,
                },
                StyleLayer {
                    layer: "pois".into(),
                    kind: StyleKind::Symbol,
                    fill_color: "#d95f5f".into(),
                    stroke_color: default_stroke_color(),
                    stroke_width: 0.0,
                },
            ],
        }
    }
}

/// Parse a `#rrggbb` / `#rrggbbaa` color; malformed input falls back to an
/// opaque mid gray rather than failing the whole tile.
pub(crate) fn parse_color(value: &str) -> tiny_skia::Color {
    let hex = value.strip_prefix('#').unwrap_or(value);
    let parse_pair = |i: usize| u8::from_str_radix(hex.get(i..i + 2).unwrap_or("ZZ"), 16);

    match hex.len() {
        6 => {
            if let (Ok(r), Ok(g), Ok(b)) = (parse_pair(0), parse_pair(2), parse_pair(4)) {
                return tiny_skia::Color::from_rgba8(r, g, b, 0xFF);
            }
        }
        8 => {
            if let (Ok(r), Ok(g), Ok(b), Ok(a)) =
                (parse_pair(0), parse_pair(2), parse_pair(4), parse_pair(6))
            {
                return tiny_skia::Color::from_rgba8(r, g, b, a);
            }
        }
        _ => {}
    }
    tiny_skia::Color::from_rgba8(0x80, 0x80, 0x80, 0xFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_sheet_json_roundtrip() {
        let sheet = StyleSheet::basic();
        let json = serde_json::to_string(&sheet).unwrap();
        let parsed: StyleSheet = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sheet);
    }

    #[test]
    fn defaults_apply_to_sparse_json() {
        let json = r#"{"layers":[{"layer":"roads","kind":"line"}]}"#;
        let sheet: StyleSheet = serde_json::from_str(json).unwrap();
        assert_eq!(sheet.layers[0].stroke_width, 1.0);
        assert_eq!(sheet.layers[0].fill_color, "#c8c8c8");
    }

    #[test]
    fn parse_color_rgb_and_rgba() {
        let c = parse_color("#ff0080");
        assert_eq!(c.to_color_u8().red(), 0xFF);
        assert_eq!(c.to_color_u8().green(), 0x00);
        assert_eq!(c.to_color_u8().blue(), 0x80);
        assert_eq!(c.to_color_u8().alpha(), 0xFF);

        let c = parse_color("#ff008040");
        assert_eq!(c.to_color_u8().alpha(), 0x40);
    }

    #[test]
    fn parse_color_falls_back_on_garbage() {
        let c = parse_color("not-a-color");
        assert_eq!(c.to_color_u8().red(), 0x80);
    }
}
