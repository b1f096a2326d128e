//! LRU cache of uploaded tile textures.
//!
//! Getting a texture promotes it to most-recently-used; a miss uploads
//! from the tile's CPU magnitudes and evicts the least-recently-used
//! texture once the cache is over its cap. The cap adapts to device
//! memory, tiered 16/32/64 textures.

use std::collections::HashMap;

use log::debug;

use crate::surface::{RasterSurface, TextureId};
use crate::tile::{SpectroTile, TileKey};

pub struct TextureCache {
    entries: HashMap<TileKey, TextureId>,
    /// LRU order: front = least recently used.
    lru: Vec<TileKey>,
    max_textures: usize,
}

impl TextureCache {
    pub fn new(max_textures: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: Vec::new(),
            max_textures: max_textures.max(1),
        }
    }

    /// Cache sized for the device: 16 textures under 2 GB, 32 under 4 GB,
    /// 64 above. Unknown memory gets the middle tier.
    pub fn with_adaptive_cap(memory_hint_mb: Option<u32>) -> Self {
        let cap = match memory_hint_mb {
            Some(mb) if mb < 2048 => 16,
            Some(mb) if mb < 4096 => 32,
            Some(_) => 64,
            None => 32,
        };
        Self::new(cap)
    }

    pub fn cap(&self) -> usize {
        self.max_textures
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: TileKey) -> bool {
        self.entries.contains_key(&key)
    }

    fn touch(&mut self, key: TileKey) {
        self.lru.retain(|k| *k != key);
        self.lru.push(key);
    }

    /// Texture for `tile`, uploading on miss. Returns `None` when the tile
    /// has neither a cached texture nor CPU magnitudes to upload from (the
    /// caller falls back to a coarser level and re-renders).
    pub fn get_or_upload(
        &mut self,
        surface: &mut impl RasterSurface,
        tile: &SpectroTile,
    ) -> Option<TextureId> {
        let key = tile.key();
        if let Some(&id) = self.entries.get(&key) {
            self.touch(key);
            return Some(id);
        }

        let pixels = tile.texture_pixels()?;
        let id = surface.upload_texture(tile.cols, tile.freq_bins, &pixels);
        self.entries.insert(key, id);
        self.lru.push(key);

        while self.entries.len() > self.max_textures {
            let oldest = self.lru.remove(0);
            if let Some(evicted) = self.entries.remove(&oldest) {
                debug!("evicting texture for L{} #{}", oldest.level, oldest.index);
                surface.drop_texture(evicted);
            }
        }
        Some(id)
    }

    /// Drop one tile's texture (e.g. after the tile was invalidated).
    pub fn remove(&mut self, surface: &mut impl RasterSurface, key: TileKey) {
        if let Some(id) = self.entries.remove(&key) {
            self.lru.retain(|k| *k != key);
            surface.drop_texture(id);
        }
    }

    pub fn clear(&mut self, surface: &mut impl RasterSurface) {
        for (_, id) in self.entries.drain() {
            surface.drop_texture(id);
        }
        self.lru.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::Colormap;
    use crate::surface::SoftwareRaster;

    fn tile(level: u8, index: usize) -> SpectroTile {
        let mut t = SpectroTile::placeholder(level, index, 0.0, 1.0, 4);
        t.cols = 2;
        t.ready = true;
        t.magnitudes = Some(vec![0; 8]);
        t
    }

    #[test]
    fn adaptive_tiers() {
        assert_eq!(TextureCache::with_adaptive_cap(Some(1024)).cap(), 16);
        assert_eq!(TextureCache::with_adaptive_cap(Some(3000)).cap(), 32);
        assert_eq!(TextureCache::with_adaptive_cap(Some(8192)).cap(), 64);
        assert_eq!(TextureCache::with_adaptive_cap(None).cap(), 32);
    }

    #[test]
    fn upload_once_then_hit() {
        let mut surface = SoftwareRaster::new(4, 4, Colormap::Viridis);
        let mut cache = TextureCache::new(4);
        let t = tile(0, 0);

        let a = cache.get_or_upload(&mut surface, &t).unwrap();
        let b = cache.get_or_upload(&mut surface, &t).unwrap();
        assert_eq!(a, b);
        assert_eq!(surface.texture_count(), 1);
    }

    #[test]
    fn lru_eviction_order() {
        let mut surface = SoftwareRaster::new(4, 4, Colormap::Viridis);
        let mut cache = TextureCache::new(2);

        let t0 = tile(0, 0);
        let t1 = tile(0, 1);
        let t2 = tile(0, 2);

        cache.get_or_upload(&mut surface, &t0).unwrap();
        cache.get_or_upload(&mut surface, &t1).unwrap();
        // Touch t0 so t1 becomes least recently used.
        cache.get_or_upload(&mut surface, &t0).unwrap();
        cache.get_or_upload(&mut surface, &t2).unwrap();

        assert!(cache.contains(TileKey::new(0, 0)));
        assert!(!cache.contains(TileKey::new(0, 1)));
        assert!(cache.contains(TileKey::new(0, 2)));
        assert_eq!(surface.texture_count(), 2);
    }

    #[test]
    fn trimmed_tile_without_texture_misses() {
        let mut surface = SoftwareRaster::new(4, 4, Colormap::Viridis);
        let mut cache = TextureCache::new(2);
        let mut t = tile(0, 0);
        t.magnitudes = None; // CPU copy trimmed, no texture yet
        assert!(cache.get_or_upload(&mut surface, &t).is_none());
    }

    #[test]
    fn clear_releases_everything() {
        let mut surface = SoftwareRaster::new(4, 4, Colormap::Viridis);
        let mut cache = TextureCache::new(4);
        cache.get_or_upload(&mut surface, &tile(0, 0)).unwrap();
        cache.get_or_upload(&mut surface, &tile(1, 0)).unwrap();
        cache.clear(&mut surface);
        assert!(cache.is_empty());
        assert_eq!(surface.texture_count(), 0);
    }
}
