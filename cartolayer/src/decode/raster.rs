//! Rasterization of decoded geometry onto the tile canvas.

use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::types::{Feature, FeatureKind, GeometrySet};

use super::style::{parse_color, StyleKind, StyleLayer, StyleSheet};
use super::{DecodeError, TILE_CANVAS_SIZE};

/// Radius of the marker drawn for symbol features, in canvas units.
const SYMBOL_RADIUS: f32 = 3.0;

/// Rasterize geometry layers onto a 256×256 canvas per the style sheet.
///
/// Style definition order is paint order. Style rules without a matching
/// geometry layer are skipped, as are features whose shape the rule cannot
/// paint (a fill rule ignores points, a symbol rule ignores polygons).
/// Returns PNG bytes.
pub fn rasterize(set: &GeometrySet, style: &StyleSheet) -> Result<Vec<u8>, DecodeError> {
    let mut pixmap = Pixmap::new(TILE_CANVAS_SIZE, TILE_CANVAS_SIZE)
        .ok_or_else(|| DecodeError::Raster("failed to allocate tile canvas".into()))?;

    for rule in &style.layers {
        let Some(layer) = set.layer(&rule.layer) else {
            continue;
        };
        for feature in &layer.features {
            paint_feature(&mut pixmap, rule, feature);
        }
    }

    pixmap
        .encode_png()
        .map_err(|e| DecodeError::Raster(format!("PNG encoding failed: {e}")))
}

fn paint_feature(pixmap: &mut Pixmap, rule: &StyleLayer, feature: &Feature) {
    let mut paint = Paint::default();
    paint.anti_alias = true;

    match (rule.kind, feature.kind) {
        (StyleKind::Fill, FeatureKind::Polygon) => {
            let Some(path) = closed_path(feature) else {
                return;
            };
            paint.set_color(parse_color(&rule.fill_color));
            pixmap.fill_path(&path, &paint, FillRule::EvenOdd, Transform::identity(), None);

            if rule.stroke_width > 0.0 {
                paint.set_color(parse_color(&rule.stroke_color));
                let stroke = Stroke {
                    width: rule.stroke_width,
                    ..Stroke::default()
                };
                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
        }
        (StyleKind::Line, FeatureKind::Line | FeatureKind::Polygon) => {
            let path = if feature.kind == FeatureKind::Polygon {
                closed_path(feature)
            } else {
                open_path(feature)
            };
            let Some(path) = path else {
                return;
            };
            paint.set_color(parse_color(&rule.stroke_color));
            let stroke = Stroke {
                width: rule.stroke_width.max(0.1),
                ..Stroke::default()
            };
            pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
        (StyleKind::Symbol, FeatureKind::Point) => {
            let Some((x, y)) = feature.rings.first().and_then(|r| r.first()) else {
                return;
            };
            let Some(path) = PathBuilder::from_circle(*x as f32, *y as f32, SYMBOL_RADIUS) else {
                return;
            };
            paint.set_color(parse_color(&rule.fill_color));
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
        // Shape/rule mismatches are skipped, not errors.
        _ => {}
    }
}

fn open_path(feature: &Feature) -> Option<tiny_skia::Path> {
    build_path(feature, false)
}

fn closed_path(feature: &Feature) -> Option<tiny_skia::Path> {
    build_path(feature, true)
}

fn build_path(feature: &Feature, close: bool) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for ring in &feature.rings {
        let mut points = ring.iter();
        let (x, y) = points.next()?;
        builder.move_to(*x as f32, *y as f32);
        for (x, y) in points {
            builder.line_to(*x as f32, *y as f32);
        }
        if close {
            builder.close();
        }
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeometryLayer;

    fn square(layer: &str) -> GeometrySet {
        GeometrySet {
            layers: vec![GeometryLayer {
                name: layer.into(),
                features: vec![Feature {
                    kind: FeatureKind::Polygon,
                    rings: vec![vec![
                        (64.0, 64.0),
                        (192.0, 64.0),
                        (192.0, 192.0),
                        (64.0, 192.0),
                    ]],
                    properties: serde_json::Map::new(),
                }],
            }],
        }
    }

    fn decode_png(bytes: &[u8]) -> image::RgbaImage {
        image::load_from_memory(bytes).unwrap().to_rgba8()
    }

    #[test]
    fn output_is_a_256_px_png() {
        let png = rasterize(&square("buildings"), &StyleSheet::basic()).unwrap();
        let img = decode_png(&png);
        assert_eq!(img.width(), TILE_CANVAS_SIZE);
        assert_eq!(img.height(), TILE_CANVAS_SIZE);
    }

    #[test]
    fn fill_rule_paints_polygon_interior() {
        let style = StyleSheet {
            layers: vec![StyleLayer {
                layer: "water".into(),
                kind: StyleKind::Fill,
                fill_color: "#0000ff".into(),
                stroke_color: "#000000".into(),
                stroke_width: 0.0,
            }],
        };
        let png = rasterize(&square("water"), &style).unwrap();
        let img = decode_png(&png);

        let center = img.get_pixel(128, 128);
        assert_eq!(center.0, [0, 0, 255, 255]);
        // Outside the square stays transparent.
        let corner = img.get_pixel(4, 4);
        assert_eq!(corner.0[3], 0);
    }

    #[test]
    fn line_rule_strokes_without_filling() {
        let set = GeometrySet {
            layers: vec![GeometryLayer {
                name: "roads".into(),
                features: vec![Feature {
                    kind: FeatureKind::Line,
                    rings: vec![vec![(0.0, 128.0), (256.0, 128.0)]],
                    properties: serde_json::Map::new(),
                }],
            }],
        };
        let style = StyleSheet {
            layers: vec![StyleLayer {
                layer: "roads".into(),
                kind: StyleKind::Line,
                fill_color: "#ffffff".into(),
                stroke_color: "#ff0000".into(),
                stroke_width: 4.0,
            }],
        };
        let img = decode_png(&rasterize(&set, &style).unwrap());

        assert_eq!(img.get_pixel(128, 128).0, [255, 0, 0, 255]);
        assert_eq!(img.get_pixel(128, 20).0[3], 0);
    }

    #[test]
    fn symbol_rule_marks_points() {
        let set = GeometrySet {
            layers: vec![GeometryLayer {
                name: "pois".into(),
                features: vec![Feature {
                    kind: FeatureKind::Point,
                    rings: vec![vec![(100.0, 100.0)]],
                    properties: serde_json::Map::new(),
                }],
            }],
        };
        let img = decode_png(&rasterize(&set, &StyleSheet::basic()).unwrap());
        assert!(img.get_pixel(100, 100).0[3] > 0);
    }

    #[test]
    fn later_style_layers_paint_on_top() {
        let set = GeometrySet {
            layers: vec![
                square("water").layers.remove(0),
                square("parks").layers.remove(0),
            ],
        };
        let style = StyleSheet {
            layers: vec![
                StyleLayer {
                    layer: "water".into(),
                    kind: StyleKind::Fill,
                    fill_color: "#0000ff".into(),
                    stroke_color: "#000000".into(),
                    stroke_width: 0.0,
                },
                StyleLayer {
                    layer: "parks".into(),
                    kind: StyleKind::Fill,
                    fill_color: "#00ff00".into(),
                    stroke_color: "#000000".into(),
                    stroke_width: 0.0,
                },
            ],
        };
        let img = decode_png(&rasterize(&set, &style).unwrap());
        // Parks is defined later, so it wins where the squares overlap.
        assert_eq!(img.get_pixel(128, 128).0, [0, 255, 0, 255]);
    }

    #[test]
    fn unmatched_style_layers_are_skipped() {
        let png = rasterize(&GeometrySet::default(), &StyleSheet::basic()).unwrap();
        let img = decode_png(&png);
        assert_eq!(img.get_pixel(128, 128).0[3], 0);
    }
}
