use colored::Color;
use once_cell::sync::Lazy;

use crate::engine::{Direction, UnitState};

/// Colors for unit states, run outcomes and help text.
pub struct Palette {
    pub applied: Color,
    pub pending: Color,
    pub reverted: Color,
    /// Changelog records with no registered unit.
    pub unknown: Color,
    pub failed: Color,
    /// Data-loss warnings and other conditions worth a second look.
    pub caution: Color,
    pub notice: Color,
    pub running: Color,
    pub heading: Color,
    pub section: Color,
    pub command: Color,
    pub muted: Color,
    pub key: Color,
    pub value: Color,
}

impl Palette {
    pub fn state(&self, state: UnitState) -> Color {
        match state {
            UnitState::Applied => self.applied,
            UnitState::Pending => self.pending,
            UnitState::Reverted => self.reverted,
        }
    }

    pub fn direction(&self, direction: Direction) -> Color {
        match direction {
            Direction::Up => self.applied,
            Direction::Down => self.reverted,
        }
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            applied: Color::Green,
            pending: Color::Yellow,
            reverted: Color::BrightBlack,
            unknown: Color::Red,
            failed: Color::Red,
            caution: Color::Yellow,
            notice: Color::Blue,
            running: Color::Cyan,
            heading: Color::BrightBlue,
            section: Color::Cyan,
            command: Color::Magenta,
            muted: Color::BrightBlack,
            key: Color::BrightCyan,
            value: Color::White,
        }
    }
}

/// Global palette instance
pub static THEME: Lazy<Palette> = Lazy::new(Palette::default);

/// Glyphs shown next to unit states and run messages
pub struct Icons {
    pub applied: &'static str,
    pub pending: &'static str,
    pub reverted: &'static str,
    pub unknown: &'static str,
    pub failed: &'static str,
    pub caution: &'static str,
    pub notice: &'static str,
    pub step: &'static str,
    pub bullet: &'static str,
    pub running: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

impl Icons {
    pub fn state(&self, state: UnitState) -> &'static str {
        match state {
            UnitState::Applied => self.applied,
            UnitState::Pending => self.pending,
            UnitState::Reverted => self.reverted,
        }
    }

    pub fn direction(&self, direction: Direction) -> &'static str {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }
}

pub const ICONS: Icons = Icons {
    applied: "✓",
    pending: "○",
    reverted: "↺",
    unknown: "?",
    failed: "✗",
    caution: "⚠",
    notice: "ℹ",
    step: "→",
    bullet: "•",
    running: "⟳",
    up: "↑",
    down: "↓",
};
