//! User stylesheets injected while capturing, and the transform arithmetic
//! behind virtual scrolling.

use serde::{Deserialize, Serialize};

use crate::geometry::Size;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SheetKind {
    /// Instant scrolling, a root at least as large as the viewport and,
    /// optionally, no scrollbars.
    Reset {
        min_width: u32,
        min_height: u32,
        hide_scrollbars: bool,
    },
    PauseAnimations,
    /// Root content moved up/left by `x`/`y` CSS pixels.
    Shift { x: f64, y: f64 },
}

/// A stylesheet together with what it does, so hosts that cannot run CSS
/// can still interpret it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stylesheet {
    pub kind: SheetKind,
    pub css: String,
    /// Apply to every frame, not only the top document.
    pub all_frames: bool,
}

impl Stylesheet {
    pub fn reset(viewport: Size, hide_scrollbars: bool) -> Self {
        let mut css = format!(
            ":root {{\n  scroll-behavior: auto !important;\n  min-width: {}px !important;\n  min-height: {}px !important;\n",
            viewport.width, viewport.height
        );
        if hide_scrollbars {
            css.push_str("  scrollbar-color: transparent transparent !important;\n");
            css.push_str("  scrollbar-width: none !important;\n");
        }
        css.push_str("}\n");
        Self {
            kind: SheetKind::Reset {
                min_width: viewport.width,
                min_height: viewport.height,
                hide_scrollbars,
            },
            css,
            all_frames: false,
        }
    }

    pub fn pause_animations() -> Self {
        Self {
            kind: SheetKind::PauseAnimations,
            css: "*, *::before, *::after {\n  animation-play-state: paused !important;\n}\n"
                .to_string(),
            all_frames: true,
        }
    }
}

/// The root element's computed style, as far as virtual scrolling cares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootStyle {
    /// `None` when the page has no individual `translate` property.
    pub translate: Option<String>,
    pub transform: String,
    /// Comma-separated lists, one entry per background layer.
    pub background_position_x: String,
    pub background_position_y: String,
}

impl Default for RootStyle {
    fn default() -> Self {
        Self {
            translate: Some("none".to_string()),
            transform: "none".to_string(),
            background_position_x: "0%".to_string(),
            background_position_y: "0%".to_string(),
        }
    }
}

impl RootStyle {
    /// Stylesheet that moves the root's content by `(-x, -y)` on top of
    /// whatever transform it already has.
    pub fn shift(&self, x: f64, y: f64) -> Stylesheet {
        let mut css = String::from(":root {\n");
        match &self.translate {
            Some(translate) => {
                css.push_str(&format!("  translate: {} !important;\n", compose_translate(translate, x, y)));
            }
            None => {
                css.push_str(&format!("  transform: {} !important;\n", compose_transform(&self.transform, x, y)));
            }
        }
        css.push_str("  transition: none !important;\n");
        if let Some(v) = shift_layers(&self.background_position_x, x) {
            css.push_str(&format!("  background-position-x: {} !important;\n", v));
        }
        if let Some(v) = shift_layers(&self.background_position_y, y) {
            css.push_str(&format!("  background-position-y: {} !important;\n", v));
        }
        css.push_str("}\n");

        Stylesheet {
            kind: SheetKind::Shift { x, y },
            css,
            all_frames: false,
        }
    }
}

/// `translate: a b c` becomes `calc(a - Xpx) calc(b - Ypx) c`.
fn compose_translate(translate: &str, x: f64, y: f64) -> String {
    let current = if translate.trim() == "none" { "" } else { translate };
    let parts: Vec<&str> = current.split_whitespace().chain(["0px"; 3]).take(3).collect();
    format!("{} {} {}", minus(parts[0], x, "px"), minus(parts[1], y, "px"), parts[2])
}

/// Fold the shift into a `matrix()`/`matrix3d()` translation, or append a
/// `translate()` when there is no matrix to fold into.
fn compose_transform(transform: &str, x: f64, y: f64) -> String {
    for (func, tx, ty) in [("matrix3d(", 12, 13), ("matrix(", 4, 5)] {
        let Some(start) = transform.find(func) else {
            continue;
        };
        let args_start = start + func.len();
        let Some(len) = transform[args_start..].find(')') else {
            continue;
        };
        let mut args: Vec<String> = transform[args_start..args_start + len]
            .split(',')
            .map(|a| a.trim().to_string())
            .collect();
        if args.len() <= ty {
            continue;
        }
        // Matrix arguments are unitless.
        args[tx] = matrix_minus(&args[tx], x);
        args[ty] = matrix_minus(&args[ty], y);
        return format!(
            "{}{}{}",
            &transform[..args_start],
            args.join(", "),
            &transform[args_start + len..]
        );
    }

    let base = if transform.trim() == "none" { "" } else { transform.trim() };
    format!("{} translate({}px, {}px)", base, negate(x), negate(y))
        .trim_start()
        .to_string()
}

fn shift_layers(list: &str, by: f64) -> Option<String> {
    if list.trim().is_empty() {
        return None;
    }
    let layers: Vec<String> = list
        .split(',')
        .map(|v| minus(v.trim(), by, "px"))
        .collect();
    Some(layers.join(", "))
}

/// `calc(<value> - <by><unit>)`, written with `+` when `by` is negative.
fn minus(value: &str, by: f64, unit: &str) -> String {
    let op = if by < 0.0 { '+' } else { '-' };
    format!("calc({} {} {}{})", value, op, by.abs(), unit)
}

fn matrix_minus(value: &str, by: f64) -> String {
    match value.parse::<f64>() {
        Ok(v) => format!("{}", v - by),
        Err(_) => minus(value, by, ""),
    }
}

/// `-v` without producing `-0`.
fn negate(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        -v
    }
}
