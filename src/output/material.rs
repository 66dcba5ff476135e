use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use super::{composite, copy_into, DisplaySink, FGR_PARAM, PHA_PARAM};
use crate::error::SinkError;
use crate::resources::{Texture, TextureId};

/// In-memory material exposing a fixed set of texture properties.
///
/// Rendering composites the foreground over a solid background using the
/// alpha texture, the same blend the matting shader performs.
#[derive(Debug)]
pub struct MaterialSink {
    properties: Vec<String>,
    bound: HashMap<String, (TextureId, Option<RgbaImage>)>,
    background: Rgba<u8>,
}

impl Default for MaterialSink {
    fn default() -> Self {
        Self::new([FGR_PARAM, PHA_PARAM])
    }
}

impl MaterialSink {
    pub fn new<I, S>(properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            properties: properties.into_iter().map(Into::into).collect(),
            bound: HashMap::new(),
            background: Rgba([0, 0, 0, 0]),
        }
    }

    pub fn with_background(mut self, background: Rgba<u8>) -> Self {
        self.background = background;
        self
    }

    /// Image currently bound to `name`.
    pub fn texture(&self, name: &str) -> Option<&RgbaImage> {
        self.bound.get(name).and_then(|(_, image)| image.as_ref())
    }

    /// Allocation bound to `name`.
    pub fn texture_id(&self, name: &str) -> Option<TextureId> {
        self.bound.get(name).map(|(id, _)| *id)
    }
}

impl DisplaySink for MaterialSink {
    fn set_texture(&mut self, name: &str, texture: &Texture) -> Result<(), SinkError> {
        if !self.properties.iter().any(|p| p == name) {
            return Err(SinkError::MissingParameter(name.to_string()));
        }
        let (id, image) = self
            .bound
            .entry(name.to_string())
            .or_insert((texture.id(), None));
        *id = texture.id();
        copy_into(image, texture.image());
        Ok(())
    }

    fn render(&mut self, target: &mut Texture) -> Result<(), SinkError> {
        let (Some(fgr), Some(pha)) = (self.texture(FGR_PARAM), self.texture(PHA_PARAM)) else {
            return Ok(());
        };
        let (width, height) = target.dimensions();
        *target.image_mut() = composite(fgr, pha, self.background, width, height);
        Ok(())
    }
}
