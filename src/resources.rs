//! Image buffer lifecycle.
//!
//! Every image buffer in the pipeline goes through [`TextureAllocator`], which
//! owns the reallocate-on-resize policy and keeps create/release counts so
//! leaks show up as a non-zero [`TextureAllocator::live`] after shutdown.

use image::RgbaImage;

/// Identity of one allocation. Never reused within an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

/// RGBA8 image buffer with an allocation identity and a debug label.
#[derive(Debug)]
pub struct Texture {
    id: TextureId,
    label: String,
    image: RgbaImage,
}

impl Texture {
    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }
}

#[derive(Debug, Default)]
pub struct TextureAllocator {
    next_id: u64,
    created: u64,
    released: u64,
}

impl TextureAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a cleared texture.
    pub fn create(&mut self, width: u32, height: u32, label: &str) -> Texture {
        self.next_id += 1;
        self.created += 1;
        tracing::debug!("Creating texture {} ({}x{})", label, width, height);
        Texture {
            id: TextureId(self.next_id),
            label: label.to_string(),
            image: RgbaImage::new(width, height),
        }
    }

    /// Release a texture. Takes ownership so the buffer cannot be used again.
    pub fn release(&mut self, texture: Texture) {
        self.released += 1;
        tracing::debug!(
            "Releasing texture {} ({}x{})",
            texture.label,
            texture.width(),
            texture.height()
        );
        drop(texture);
    }

    /// Return the texture in `slot`, reallocating it when the slot is empty,
    /// its dimensions differ, or `force_recreate` is set.
    pub fn get_or_create<'a>(
        &mut self,
        slot: &'a mut Option<Texture>,
        width: u32,
        height: u32,
        label: &str,
        force_recreate: bool,
    ) -> &'a mut Texture {
        let stale = match slot.as_ref() {
            Some(texture) => texture.dimensions() != (width, height) || force_recreate,
            None => true,
        };

        if stale {
            self.release_slot(slot);
        }

        slot.get_or_insert_with(|| self.create(width, height, label))
    }

    /// Release whatever `slot` holds, if anything.
    pub fn release_slot(&mut self, slot: &mut Option<Texture>) {
        if let Some(texture) = slot.take() {
            self.release(texture);
        }
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    /// Allocations not yet released.
    pub fn live(&self) -> u64 {
        self.created - self.released
    }
}
