//! Well-known file names and defaults.

/// Global settings file inside the settings directory's parent.
pub const GLOBAL_SETTINGS_FILENAME: &str = "settings.yaml";

/// Extensions accepted for per-package settings files.
pub const SETTINGS_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Extension of patch files.
pub const PATCH_EXTENSION: &str = "patch";

/// Default name of the persisted build order.
pub const BUILD_ORDER_FILENAME: &str = "build-order.json";

/// Current build order format version.
pub const BUILD_ORDER_VERSION: u32 = 1;

/// Variant used when none is configured.
pub const DEFAULT_VARIANT: &str = "cpu";

/// Index name used when a package does not configure its own.
pub const DEFAULT_INDEX: &str = "https://pypi.org/simple";

/// Python version wheels are built for unless configured otherwise.
pub const DEFAULT_PYTHON_VERSION: &str = "3.12";
