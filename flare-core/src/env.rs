//! Environment detection for Flare
//!
//! Detects the display server the process runs under. Capture goes through
//! X11, so a native Wayland session without XWayland cannot be captured and
//! XWayland only exposes X11 clients.

use std::env;
use std::fs;
use tracing::{debug, info};

/// Display server the session runs on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayServer {
    /// Plain X11 session
    X11 { display: String },
    /// Wayland session with an XWayland server
    XWayland { display: String, compositor: String },
    /// Wayland session without X11 access
    Wayland { compositor: String },
    /// No display found
    Unknown,
}

impl DisplayServer {
    /// X11 display name to connect to, if any
    pub fn x11_display(&self) -> Option<&str> {
        match self {
            DisplayServer::X11 { display } | DisplayServer::XWayland { display, .. } => {
                Some(display)
            }
            _ => None,
        }
    }

    /// Whether X11 capture can be attempted
    pub fn can_capture(&self) -> bool {
        self.x11_display().is_some()
    }

    /// Caveat to show the user, if any
    pub fn capture_note(&self) -> Option<&'static str> {
        match self {
            DisplayServer::XWayland { .. } => {
                Some("XWayland only exposes X11 windows; native Wayland windows appear black")
            }
            DisplayServer::Wayland { .. } => Some("No X11 display; start XWayland or an X11 session"),
            DisplayServer::Unknown => Some("No display found; is DISPLAY set?"),
            DisplayServer::X11 { .. } => None,
        }
    }

    /// Get a human-readable description
    pub fn description(&self) -> String {
        match self {
            DisplayServer::X11 { display } => format!("X11 ({})", display),
            DisplayServer::XWayland {
                display,
                compositor,
            } => format!("XWayland ({}, {})", display, compositor),
            DisplayServer::Wayland { compositor } => format!("Wayland ({})", compositor),
            DisplayServer::Unknown => "Unknown".to_string(),
        }
    }
}

/// Detect the current display server
pub fn detect_display_server() -> DisplayServer {
    let server = detect_with(|key| env::var(key).ok());
    match server {
        DisplayServer::Unknown => debug!("Could not detect display server"),
        ref other => info!("Detected display server: {}", other.description()),
    }
    server
}

/// Detection over an arbitrary variable lookup
pub fn detect_with(var: impl Fn(&str) -> Option<String>) -> DisplayServer {
    let display = var("DISPLAY").filter(|d| !d.is_empty());
    let wayland = var("XDG_SESSION_TYPE").as_deref() == Some("wayland")
        || var("WAYLAND_DISPLAY").is_some();

    match (display, wayland) {
        (Some(display), false) => DisplayServer::X11 { display },
        (Some(display), true) => DisplayServer::XWayland {
            display,
            compositor: detect_compositor(&var),
        },
        (None, true) => DisplayServer::Wayland {
            compositor: detect_compositor(&var),
        },
        (None, false) => DisplayServer::Unknown,
    }
}

/// Detect the desktop or compositor name
fn detect_compositor(var: &impl Fn(&str) -> Option<String>) -> String {
    if let Some(desktop) = var("XDG_CURRENT_DESKTOP") {
        let desktop_lower = desktop.to_lowercase();

        if desktop_lower.contains("hyprland") {
            return "Hyprland".to_string();
        }
        if desktop_lower.contains("kde") || desktop_lower.contains("plasma") {
            return "KDE Plasma".to_string();
        }
        if desktop_lower.contains("gnome") {
            return "GNOME".to_string();
        }
        if desktop_lower.contains("sway") {
            return "Sway".to_string();
        }
        if desktop_lower.contains("cosmic") {
            return "COSMIC".to_string();
        }

        return desktop;
    }

    if let Some(session) = var("XDG_SESSION_DESKTOP").or_else(|| var("DESKTOP_SESSION")) {
        return session;
    }

    if var("HYPRLAND_INSTANCE_SIGNATURE").is_some() {
        return "Hyprland".to_string();
    }
    if var("SWAYSOCK").is_some() {
        return "Sway".to_string();
    }

    "Unknown".to_string()
}

/// Operating system name for session records
///
/// Uses `PRETTY_NAME` from `/etc/os-release`, falling back to the kernel
/// family name.
pub fn os_name() -> String {
    fs::read_to_string("/etc/os-release")
        .ok()
        .and_then(|content| parse_pretty_name(&content))
        .unwrap_or_else(|| env::consts::OS.to_string())
}

fn parse_pretty_name(os_release: &str) -> Option<String> {
    os_release
        .lines()
        .find_map(|line| line.strip_prefix("PRETTY_NAME="))
        .map(|value| value.trim().trim_matches('"').to_string())
        .filter(|name| !name.is_empty())
}
