//! Shared styling utilities for terminal output.

use console::Style;

use dlgmerge_core::conflict::Classification;

/// Create a success-styled string (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Create a warning-styled string (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    let style = Style::new().bold();
    style.apply_to(msg).to_string()
}

/// Create a dim-styled string.
pub fn dim(msg: &str) -> String {
    let style = Style::new().dim();
    style.apply_to(msg).to_string()
}

/// Colored label for a conflict classification.
pub fn classification(class: Classification) -> String {
    let style = match class {
        Classification::CompatibleAdd => Style::new().green(),
        Classification::NodeValueConflict => Style::new().yellow(),
        Classification::EdgeSetConflict => Style::new().cyan(),
        Classification::StructuralConflict => Style::new().red().bold(),
    };
    style.apply_to(class.to_string()).to_string()
}
