//! Durable resource cache and the sample-path safety check.
//!
//! Owned by the facade; populated as a side effect of
//! `loadSynthDef`/`loadSample` and consulted by `recover` to rehydrate the
//! engine after a forced reload. Not on the hot path. Path handling stays
//! `PathBuf`-based, never string splicing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A synth-def or sample's backing content: embedded bytes, or a URL for
/// the (out-of-scope) fetch layer to resolve later.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceRef {
    Bytes(Vec<u8>),
    Url(String),
}

pub type BufferId = u32;

/// Name/buffer-id keyed cache of everything loaded this session, kept so
/// `recover`'s full-reload path can replay every load without the
/// application having to remember what it already sent.
#[derive(Debug, Default)]
pub struct ResourceCache {
    synthdefs: HashMap<String, ResourceRef>,
    samples: HashMap<BufferId, ResourceRef>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_synthdef(&mut self, name: String, resource: ResourceRef) {
        self.synthdefs.insert(name, resource);
    }

    pub fn record_sample(&mut self, buffer_id: BufferId, resource: ResourceRef) {
        self.samples.insert(buffer_id, resource);
    }

    pub fn synthdefs(&self) -> impl Iterator<Item = (&String, &ResourceRef)> {
        self.synthdefs.iter()
    }

    pub fn samples(&self) -> impl Iterator<Item = (&BufferId, &ResourceRef)> {
        self.samples.iter()
    }

    pub fn clear(&mut self) {
        self.synthdefs.clear();
        self.samples.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidResourcePath;

/// Validates a sample/synth-def path: reject `..`
/// components, backslashes, and absolute paths outside `base` — except an
/// absolute-looking path prefixed with `./`, which bypasses the base check
/// entirely (taken as relative to the current directory by convention).
pub fn validate_resource_path(input: &str, base: &Path) -> Result<PathBuf, InvalidResourcePath> {
    if input.contains('\\') {
        return Err(InvalidResourcePath);
    }
    if input.starts_with("./") {
        return Ok(PathBuf::from(input));
    }

    let candidate = Path::new(input);
    if candidate.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(InvalidResourcePath);
    }

    if candidate.is_absolute() {
        if candidate.starts_with(base) {
            return Ok(candidate.to_path_buf());
        }
        return Err(InvalidResourcePath);
    }

    Ok(base.join(candidate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_is_joined_to_base() {
        let base = Path::new("/resources");
        let resolved = validate_resource_path("kick.wav", base).unwrap();
        assert_eq!(resolved, PathBuf::from("/resources/kick.wav"));
    }

    #[test]
    fn parent_dir_traversal_is_rejected() {
        let base = Path::new("/resources");
        assert_eq!(validate_resource_path("../secrets.wav", base), Err(InvalidResourcePath));
        assert_eq!(validate_resource_path("a/../../b.wav", base), Err(InvalidResourcePath));
    }

    #[test]
    fn backslashes_are_rejected() {
        let base = Path::new("/resources");
        assert_eq!(validate_resource_path("a\\b.wav", base), Err(InvalidResourcePath));
    }

    #[test]
    fn absolute_path_outside_base_is_rejected() {
        let base = Path::new("/resources");
        assert_eq!(validate_resource_path("/etc/passwd", base), Err(InvalidResourcePath));
    }

    #[test]
    fn absolute_path_inside_base_is_accepted() {
        let base = Path::new("/resources");
        assert!(validate_resource_path("/resources/sub/kick.wav", base).is_ok());
    }

    #[test]
    fn dot_slash_prefix_bypasses_base() {
        let base = Path::new("/resources");
        let resolved = validate_resource_path("./local/kick.wav", base).unwrap();
        assert_eq!(resolved, PathBuf::from("./local/kick.wav"));
    }

    #[test]
    fn cache_records_and_clears() {
        let mut cache = ResourceCache::new();
        cache.record_synthdef("beep".to_string(), ResourceRef::Bytes(vec![1, 2, 3]));
        cache.record_sample(0, ResourceRef::Url("https://example.test/kick.wav".to_string()));
        assert_eq!(cache.synthdefs().count(), 1);
        assert_eq!(cache.samples().count(), 1);
        cache.clear();
        assert_eq!(cache.synthdefs().count(), 0);
    }
}
