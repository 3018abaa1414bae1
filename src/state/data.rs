//! Shared data structures for the preview cache
//!
//! These structs represent the data model that flows between
//! the database layer, the memory tier and the loader.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

/// A fully qualified component: the package that owns it and its class name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentName {
    pub package: String,
    pub class: String,
}

impl ComponentName {
    pub fn new(package: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            class: class.into(),
        }
    }

    /// Long form, `package/class`. This is the form stored in the database.
    pub fn flatten(&self) -> String {
        format!("{}/{}", self.package, self.class)
    }
}

impl fmt::Display for ComponentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flatten())
    }
}

/// Error returned when a component or size string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {input:?}")]
pub struct ParseError {
    kind: &'static str,
    input: String,
}

impl FromStr for ComponentName {
    type Err = ParseError;

    /// Accepts `pkg/cls` and the short form `pkg/.Cls`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError {
            kind: "component name",
            input: s.to_string(),
        };

        let (package, class) = s.split_once('/').ok_or_else(err)?;
        if package.is_empty() || class.is_empty() {
            return Err(err());
        }

        let class = if class.starts_with('.') {
            format!("{}{}", package, class)
        } else {
            class.to_string()
        };

        Ok(Self::new(package, class))
    }
}

/// Serial number of a user profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    /// The primary user. Shortcuts are always keyed under this profile.
    pub const OWNER: UserId = UserId(0);
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Target dimensions of a preview, in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PreviewSize {
    pub width: u32,
    pub height: u32,
}

impl PreviewSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for PreviewSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for PreviewSize {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError {
            kind: "preview size",
            input: s.to_string(),
        };

        let (w, h) = s.split_once('x').ok_or_else(err)?;
        let width: u32 = w.trim().parse().map_err(|_| err())?;
        let height: u32 = h.trim().parse().map_err(|_| err())?;
        if width == 0 || height == 0 {
            return Err(err());
        }
        Ok(Self { width, height })
    }
}

/// Uniquely identifies one cached preview
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub component: ComponentName,
    pub user: UserId,
    pub size: PreviewSize,
}

impl CacheKey {
    pub fn new(component: ComponentName, user: UserId, size: PreviewSize) -> Self {
        Self {
            component,
            user,
            size,
        }
    }

    pub fn package(&self) -> &str {
        &self.component.package
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (user {}, {})", self.component, self.user, self.size)
    }
}

/// Installed revision of a package at the moment a preview was generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionStamp {
    pub version_code: i64,
    /// Milliseconds since the epoch
    pub last_update_time: i64,
}

impl VersionStamp {
    /// Recorded when package metadata could not be read
    pub const ZERO: VersionStamp = VersionStamp {
        version_code: 0,
        last_update_time: 0,
    };

    pub fn new(version_code: i64, last_update_time: i64) -> Self {
        Self {
            version_code,
            last_update_time,
        }
    }
}

/// One row of the preview database
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentRecord {
    pub key: CacheKey,
    pub package: String,
    pub stamp: VersionStamp,
    /// PNG encoded preview
    pub blob: Vec<u8>,
}

/// An installed widget provider
#[derive(Debug, Clone)]
pub struct WidgetProvider {
    pub provider: ComponentName,
    pub user: UserId,
    /// Horizontal cell span, values below 1 are treated as 1
    pub span_x: u32,
    pub span_y: u32,
    /// Artwork shipped by the provider, if any
    pub preview: Option<Arc<RgbaImage>>,
    pub icon: Option<Arc<RgbaImage>>,
}

/// An activity that can be placed as a shortcut
#[derive(Debug, Clone)]
pub struct ShortcutActivity {
    pub component: ComponentName,
    pub icon: Option<Arc<RgbaImage>>,
}

/// What a preview is rendered from
#[derive(Debug, Clone)]
pub enum PreviewSource {
    Widget(WidgetProvider),
    Shortcut(ShortcutActivity),
}

impl PreviewSource {
    pub fn component(&self) -> &ComponentName {
        match self {
            PreviewSource::Widget(info) => &info.provider,
            PreviewSource::Shortcut(info) => &info.component,
        }
    }

    pub fn user(&self) -> UserId {
        match self {
            PreviewSource::Widget(info) => info.user,
            PreviewSource::Shortcut(_) => UserId::OWNER,
        }
    }

    pub fn package(&self) -> &str {
        &self.component().package
    }

    pub fn cache_key(&self, size: PreviewSize) -> CacheKey {
        CacheKey::new(self.component().clone(), self.user(), size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_round_trip() {
        let name = ComponentName::new("com.android.calculator2", "com.android.calculator2.Widget");
        assert_eq!(name.flatten(), "com.android.calculator2/com.android.calculator2.Widget");
        assert_eq!(name.flatten().parse::<ComponentName>().unwrap(), name);
    }

    #[test]
    fn test_component_short_form() {
        let name: ComponentName = "com.example/.Clock".parse().unwrap();
        assert_eq!(name.package, "com.example");
        assert_eq!(name.class, "com.example.Clock");
    }

    #[test]
    fn test_component_rejects_garbage() {
        assert!("no-slash".parse::<ComponentName>().is_err());
        assert!("/Cls".parse::<ComponentName>().is_err());
        assert!("pkg/".parse::<ComponentName>().is_err());
    }

    #[test]
    fn test_size_parse() {
        let size: PreviewSize = "100x80".parse().unwrap();
        assert_eq!(size, PreviewSize::new(100, 80));
        assert_eq!(size.to_string(), "100x80");
        assert!("100".parse::<PreviewSize>().is_err());
        assert!("0x10".parse::<PreviewSize>().is_err());
    }

    #[test]
    fn test_key_equality_includes_size() {
        let component = ComponentName::new("p", "p.A");
        let a = CacheKey::new(component.clone(), UserId(0), PreviewSize::new(10, 10));
        let b = CacheKey::new(component.clone(), UserId(0), PreviewSize::new(10, 20));
        let c = CacheKey::new(component, UserId(1), PreviewSize::new(10, 10));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.clone(), a);
    }

    #[test]
    fn test_shortcuts_key_under_owner() {
        let source = PreviewSource::Shortcut(ShortcutActivity {
            component: ComponentName::new("p", "p.Main"),
            icon: None,
        });
        let key = source.cache_key(PreviewSize::new(4, 4));
        assert_eq!(key.user, UserId::OWNER);
        assert_eq!(key.package(), "p");
    }
}
