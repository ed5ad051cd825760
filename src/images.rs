//! Named image registry consulted for background images.

use std::collections::HashMap;
use std::path::Path;

use image::RgbaImage;
use tracing::debug;

use crate::error::ResourceError;

/// Decoded RGBA images keyed by name.
#[derive(Default)]
pub struct ImageCache {
    images: HashMap<String, RgbaImage>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `image` under `name`, returning whatever was there before.
    pub fn insert(&mut self, name: impl Into<String>, image: RgbaImage) -> Option<RgbaImage> {
        self.images.insert(name.into(), image)
    }

    /// Decodes the file at `path` and registers it under `name`.
    pub fn load(&mut self, name: impl Into<String>, path: impl AsRef<Path>) -> Result<(), ResourceError> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| ResourceError::Upload(format!("{}: {e}", path.display())))?
            .to_rgba8();
        let name = name.into();
        debug!(%name, width = image.width(), height = image.height(), "image loaded");
        self.images.insert(name, image);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RgbaImage> {
        self.images.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.images.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<RgbaImage> {
        self.images.remove(name)
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut cache = ImageCache::new();
        assert!(cache.is_empty());
        cache.insert("sky", RgbaImage::new(4, 2));
        assert!(cache.contains("sky"));
        assert_eq!(cache.get("sky").map(|i| i.dimensions()), Some((4, 2)));
        assert!(cache.get("ground").is_none());
        assert!(cache.remove("sky").is_some());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn missing_file_is_an_upload_error() {
        let mut cache = ImageCache::new();
        let err = cache.load("nope", "/definitely/not/here.png").unwrap_err();
        assert!(matches!(err, ResourceError::Upload(_)));
        assert!(!cache.contains("nope"));
    }
}
