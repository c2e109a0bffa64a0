//! Component versions for `--version`-style reports.

use once_cell::sync::Lazy;

use crate::decoder::BackendRegistry;

static LIBRARY_VERSIONS: Lazy<Vec<(String, String)>> = Lazy::new(|| {
    let mut versions = vec![(
        env!("CARGO_PKG_NAME").to_string(),
        env!("CARGO_PKG_VERSION").to_string(),
    )];
    for backend in BackendRegistry::with_defaults().known_backends() {
        versions.push((
            format!("{backend} backend"),
            env!("CARGO_PKG_VERSION").to_string(),
        ));
    }
    versions
});

/// `(component, version)` pairs, computed once per process.
pub fn library_versions() -> &'static [(String, String)] {
    &LIBRARY_VERSIONS
}
