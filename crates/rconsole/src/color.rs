use std::sync::atomic::{AtomicBool, Ordering};

use crossterm::style::Stylize;

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disables styling when `--no-color` is given or `NO_COLOR` is set.
pub fn color_init(no_color: bool) {
    let disabled = no_color || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
    COLORS_ENABLED.store(!disabled, Ordering::Relaxed);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

pub struct Colors;

impl Colors {
    pub fn error(text: &str) -> String {
        if colors_enabled() {
            text.red().bold().to_string()
        } else {
            text.to_string()
        }
    }

    pub fn dim(text: &str) -> String {
        if colors_enabled() {
            text.dark_grey().to_string()
        } else {
            text.to_string()
        }
    }
}
