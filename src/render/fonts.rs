//! Process-wide font registration for the bitmap backend.
//!
//! The backend looks fonts up by family name, so the first usable TrueType file
//! is read once, leaked to get a `'static` slice, and registered under
//! [`FONT_FAMILY`]. Later calls reuse that outcome, including a miss.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use plotters::style::{FontStyle, register_font};
use tracing::{debug, warn};

/// Family name every text element is drawn with.
pub static FONT_FAMILY: &str = "sans-serif";

static SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/noto/NotoSans-Regular.ttf",
    "/usr/share/fonts/noto/NotoSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/Library/Fonts/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

static REGISTERED: OnceLock<Option<PathBuf>> = OnceLock::new();

/// First existing font file: the configured one, else a known system location.
pub fn find_font(configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Some(path.to_path_buf());
        }
        warn!("Configured font {} does not exist", path.display());
    }
    SYSTEM_FONTS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

fn register(configured: Option<&Path>) -> Option<PathBuf> {
    let path = find_font(configured)?;
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read font {}: {}", path.display(), e);
            return None;
        }
    };
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    match register_font(FONT_FAMILY, FontStyle::Normal, bytes) {
        Ok(()) => {
            debug!("Registered font {}", path.display());
            Some(path)
        }
        Err(_) => {
            warn!("{} is not a usable TrueType font", path.display());
            None
        }
    }
}

/// Register a font once per process. Returns the registered file, if any.
///
/// A configured font that differs from the one already registered is ignored
/// with a warning.
pub fn ensure_registered(configured: Option<&Path>) -> Option<&'static Path> {
    let registered = REGISTERED
        .get_or_init(|| register(configured))
        .as_deref();
    if let Some(path) = ignored_font(configured, registered) {
        warn!(
            "Font {} was not used, {} is already registered for this process",
            path.display(),
            registered.map_or("no font".into(), Path::to_string_lossy)
        );
    }
    registered
}

/// The configured font when it is not the one in effect.
fn ignored_font<'a>(configured: Option<&'a Path>, registered: Option<&Path>) -> Option<&'a Path> {
    configured.filter(|&path| Some(path) != registered && path.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_configured_font_falls_back() {
        let missing = Path::new("/definitely/not/a/font.ttf");
        let found = find_font(Some(missing));
        assert_ne!(found.as_deref(), Some(missing));
    }

    #[test]
    fn existing_configured_font_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert_eq!(find_font(Some(file.path())).as_deref(), Some(file.path()));
    }

    #[test]
    fn differing_font_after_registration_is_reported() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let other = Path::new("/usr/share/fonts/other.ttf");
        assert_eq!(ignored_font(Some(file.path()), Some(other)), Some(file.path()));
        assert_eq!(ignored_font(Some(file.path()), None), Some(file.path()));
        assert_eq!(ignored_font(Some(file.path()), Some(file.path())), None);
        assert_eq!(ignored_font(None, Some(other)), None);
    }

    #[test]
    fn registration_is_stable() {
        let first = ensure_registered(None);
        let second = ensure_registered(None);
        assert_eq!(first, second);
    }
}
