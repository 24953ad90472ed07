use std::fmt;
use std::sync::Arc;

/// Identifier for one generation session.
///
/// Changes on every submit so stale events can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl SessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Title-case role names expected by multimodal processors.
    pub fn title(&self) -> &'static str {
        match self {
            Self::System => "System",
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// Decoded pixels handed back by an image-synthesis run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Expands the pixel buffer to opaque RGBA.
    ///
    /// Single-channel images are treated as grayscale; any alpha channel is discarded.
    pub fn to_rgba(&self) -> Vec<u8> {
        let channels = usize::from(self.channels.max(1));
        let pixel_count = self.width as usize * self.height as usize;
        let mut rgba = Vec::with_capacity(pixel_count * 4);

        for pixel in self.data.chunks_exact(channels).take(pixel_count) {
            let (r, g, b) = if channels >= 3 {
                (pixel[0], pixel[1], pixel[2])
            } else {
                (pixel[0], pixel[0], pixel[0])
            };
            rgba.extend_from_slice(&[r, g, b, u8::MAX]);
        }

        rgba
    }
}

/// Opaque reference to an image shown in, or sent with, a chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageRef {
    /// Object, data or remote URL supplied by the UI.
    Url(String),
    Raster(Arc<RasterImage>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Optional payload submitted together with a prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Image(ImageRef),
    Audio(AudioClip),
}

impl Attachment {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Image(_) => "image",
            Self::Audio(_) => "audio",
        }
    }
}

/// One conversation turn as the inference library sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
    pub image: Option<ImageRef>,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }
}
