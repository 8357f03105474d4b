use crate::assets::AssetStore;
use crate::debounce::{Debouncer, TimerFired, TimerKey};
use crate::document::Context;
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKey, EntityKind, ModelEvent, MutationObserver};
use crate::fetch::{decode_image, ContentFetcher, DecodedImage};
use crate::models::{
    ContentsFile, ImageMime, ItemFile, ItemKind, Rect, Rotation, Size, TransformFile,
};
use std::fs;
use uuid::Uuid;

/// Vertical space an item frame takes above its content.
pub const ITEM_CHROME_HEIGHT: i32 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    Loaded { bytes: Vec<u8>, pixel_size: Size },
    /// Asset could not be read on load. The reference is kept so the next
    /// save writes it back unchanged.
    Missing { url: String, reason: String },
}

#[derive(Debug)]
pub struct ImageContent {
    asset_name: String,
    mime: ImageMime,
    rotation: Rotation,
    state: ImageState,
    display_size: Size,
    resize: Debouncer,
}

impl ImageContent {
    fn new(
        key: EntityKey,
        asset_name: String,
        mime: ImageMime,
        rotation: Rotation,
        state: ImageState,
        ctx: &Context,
    ) -> Self {
        Self {
            asset_name,
            mime,
            rotation,
            state,
            display_size: Size::default(),
            resize: Debouncer::new(
                TimerKey::ImageResize(key),
                ctx.image_resize_window,
                ctx.timers.clone(),
            ),
        }
    }

    pub fn asset_name(&self) -> &str {
        &self.asset_name
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn state(&self) -> &ImageState {
        &self.state
    }

    pub fn is_missing(&self) -> bool {
        matches!(self.state, ImageState::Missing { .. })
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.state {
            ImageState::Loaded { bytes, .. } => Some(bytes),
            ImageState::Missing { .. } => None,
        }
    }

    pub fn pixel_size(&self) -> Option<Size> {
        match &self.state {
            ImageState::Loaded { pixel_size, .. } => Some(*pixel_size),
            ImageState::Missing { .. } => None,
        }
    }

    pub fn display_size(&self) -> Size {
        self.display_size
    }

    pub fn resize_pending(&self) -> bool {
        self.resize.is_pending()
    }

    fn rescale(&mut self, width: i32, item_height: i32) {
        self.display_size = match self.pixel_size() {
            Some(original) => {
                let oriented = if self.rotation.is_quarter_turn() {
                    Size::new(original.height, original.width)
                } else {
                    original
                };
                scaled_to_width(oriented, width)
            }
            None => Size::new(width.max(0), (item_height - ITEM_CHROME_HEIGHT).max(0)),
        };
    }
}

/// Aspect-preserving scale of `original` to `width`.
pub fn scaled_to_width(original: Size, width: i32) -> Size {
    let width = width.max(0);
    if original.width <= 0 {
        return Size::new(width, 0);
    }
    let height = (f64::from(original.height) * f64::from(width) / f64::from(original.width)).round();
    Size::new(width, height as i32)
}

#[derive(Debug)]
pub enum Content {
    Text(String),
    Code(String),
    Image(ImageContent),
}

impl Content {
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Text(_) => ItemKind::Text,
            Self::Code(_) => ItemKind::Code,
            Self::Image(_) => ItemKind::Image,
        }
    }
}

#[derive(Debug)]
pub struct Item {
    key: EntityKey,
    page: Option<EntityKey>,
    id: String,
    geometry: Rect,
    z_index: usize,
    content: Content,
    observer: MutationObserver,
}

impl Item {
    pub fn new_text(id: impl Into<String>, geometry: Rect, blob: impl Into<String>, ctx: &Context) -> Self {
        Self::with_content(EntityKey::next(), id.into(), geometry, Content::Text(blob.into()), ctx)
    }

    pub fn new_code(id: impl Into<String>, geometry: Rect, blob: impl Into<String>, ctx: &Context) -> Self {
        Self::with_content(EntityKey::next(), id.into(), geometry, Content::Code(blob.into()), ctx)
    }

    /// Fetches and decodes `source`. GIF bytes go to the asset store right
    /// away; PNG bytes wait for the first save.
    pub fn new_image(
        id: impl Into<String>,
        geometry: Rect,
        source: &str,
        fetcher: &dyn ContentFetcher,
        ctx: &Context,
        height_from_width: bool,
    ) -> AppResult<Self> {
        let DecodedImage {
            bytes,
            mime,
            pixel_size,
        } = fetcher.fetch_image(source)?;
        let asset_name = Uuid::new_v4().to_string();
        if mime == ImageMime::Gif {
            ctx.assets.save(&asset_name, &bytes)?;
        }

        let key = EntityKey::next();
        let mut image = ImageContent::new(
            key,
            asset_name,
            mime,
            Rotation::Deg0,
            ImageState::Loaded { bytes, pixel_size },
            ctx,
        );
        image.rescale(geometry.width, geometry.height);

        let mut geometry = geometry;
        if height_from_width {
            geometry.height = image.display_size.height + ITEM_CHROME_HEIGHT;
        }
        tracing::debug!(
            asset = image.asset_name.as_str(),
            mime = mime.as_str(),
            width = pixel_size.width,
            height = pixel_size.height,
            "image item created"
        );
        Ok(Self::with_content(key, id.into(), geometry, Content::Image(image), ctx))
    }

    fn with_content(key: EntityKey, id: String, geometry: Rect, content: Content, ctx: &Context) -> Self {
        Self {
            key,
            page: None,
            id,
            geometry,
            z_index: 0,
            content,
            observer: ctx.observer.clone(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    /// The page this item was added to.
    pub fn page(&self) -> Option<EntityKey> {
        self.page
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> ItemKind {
        self.content.kind()
    }

    pub fn geometry(&self) -> Rect {
        self.geometry
    }

    pub fn z_index(&self) -> usize {
        self.z_index
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn text(&self) -> Option<&str> {
        match &self.content {
            Content::Text(blob) | Content::Code(blob) => Some(blob),
            Content::Image(_) => None,
        }
    }

    pub fn image(&self) -> Option<&ImageContent> {
        match &self.content {
            Content::Image(image) => Some(image),
            _ => None,
        }
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub(crate) fn attach(&mut self, page: EntityKey) {
        self.page = Some(page);
    }

    pub(crate) fn set_z_index(&mut self, z_index: usize) {
        self.z_index = z_index;
    }

    /// Returns false when nothing changed. The owning page runs the edge check.
    pub(crate) fn set_geometry(&mut self, geometry: Rect) -> bool {
        if self.geometry == geometry {
            return false;
        }
        self.geometry = geometry;
        if let Content::Image(image) = &mut self.content {
            image.resize.start();
        }
        self.modified();
        true
    }

    pub(crate) fn set_content(&mut self, blob: String) -> AppResult<()> {
        match &mut self.content {
            Content::Text(current) | Content::Code(current) => {
                if *current == blob {
                    return Ok(());
                }
                *current = blob;
            }
            Content::Image(_) => {
                return Err(AppError::Unsupported(format!(
                    "item '{}' is an image and has no text content",
                    self.id
                )))
            }
        }
        self.modified();
        Ok(())
    }

    /// Switches between text and code. The blob is kept as is.
    pub(crate) fn convert(&mut self, kind: ItemKind) -> AppResult<bool> {
        let next = match (&mut self.content, kind) {
            (Content::Text(_), ItemKind::Text)
            | (Content::Code(_), ItemKind::Code)
            | (Content::Image(_), ItemKind::Image) => return Ok(false),
            (Content::Text(blob), ItemKind::Code) => Content::Code(std::mem::take(blob)),
            (Content::Code(blob), ItemKind::Text) => Content::Text(std::mem::take(blob)),
            (content, kind) => {
                return Err(AppError::Unsupported(format!(
                    "cannot convert a {} item to {}",
                    content.kind().as_str(),
                    kind.as_str()
                )))
            }
        };
        self.content = next;
        self.modified();
        Ok(true)
    }

    /// Returns true when the frame height changed to fit the turned image.
    /// A placeholder keeps its frame.
    pub(crate) fn rotate(&mut self, rotation: Rotation) -> AppResult<bool> {
        let Rect { width, height, .. } = self.geometry;
        let Content::Image(image) = &mut self.content else {
            return Err(AppError::Unsupported(format!(
                "item '{}' is not an image and cannot be rotated",
                self.id
            )));
        };
        if image.rotation == rotation {
            return Ok(false);
        }
        image.rotation = rotation;
        image.rescale(width, height);
        let fitted = image
            .pixel_size()
            .map(|_| image.display_size.height + ITEM_CHROME_HEIGHT);

        let resized = match fitted {
            Some(fitted) if fitted != height => {
                self.geometry.height = fitted;
                true
            }
            _ => false,
        };
        self.modified();
        Ok(resized)
    }

    /// Recomputes the display size from the original pixels.
    pub(crate) fn resize_image(&mut self, width: i32) {
        let height = self.geometry.height;
        if let Content::Image(image) = &mut self.content {
            image.rescale(width, height);
        }
    }

    pub(crate) fn on_resize_timer(&mut self, fired: &TimerFired) -> bool {
        let accepted = match &mut self.content {
            Content::Image(image) => image.resize.accept(fired),
            _ => false,
        };
        if accepted {
            self.resize_image(self.geometry.width);
        }
        accepted
    }

    pub(crate) fn flush_pending_resize(&mut self) -> bool {
        let pending = match &mut self.content {
            Content::Image(image) => image.resize.take_pending(),
            _ => false,
        };
        if pending {
            self.resize_image(self.geometry.width);
        }
        pending
    }

    /// Deletes the backing asset of an image item. `None` means the item has
    /// no asset and the store was not consulted.
    pub(crate) fn release_asset(&self, assets: &AssetStore) -> Option<bool> {
        let image = self.image()?;
        match assets.delete(&image.asset_name) {
            Ok(deleted) => Some(deleted),
            Err(error) => {
                tracing::warn!(
                    item = self.id.as_str(),
                    asset = image.asset_name.as_str(),
                    error = %error,
                    "failed to delete image asset"
                );
                Some(false)
            }
        }
    }

    pub fn marshal(&self, assets: &AssetStore) -> AppResult<ItemFile> {
        let contents = match &self.content {
            Content::Text(blob) => ContentsFile::Text {
                value: blob.clone(),
            },
            Content::Code(blob) => ContentsFile::Code {
                value: blob.clone(),
            },
            Content::Image(image) => {
                let url = match &image.state {
                    ImageState::Loaded { bytes, .. } => {
                        assets.save(&image.asset_name, bytes)?;
                        AssetStore::relative_url(&image.asset_name)
                    }
                    ImageState::Missing { url, .. } => url.clone(),
                };
                ContentsFile::Image {
                    url,
                    asset_name: image.asset_name.clone(),
                    transform: (image.rotation != Rotation::Deg0).then_some(TransformFile {
                        rotation: image.rotation,
                    }),
                }
            }
        };
        Ok(ItemFile {
            geometry: self.geometry.to_array(),
            contents,
        })
    }

    /// Fails with `AssetLoad` when an image asset cannot be read or decoded.
    pub fn unmarshal(id: &str, data: &ItemFile, ctx: &Context) -> AppResult<Self> {
        let geometry = Rect::from_array(data.geometry);
        let key = EntityKey::next();
        let content = match &data.contents {
            ContentsFile::Text { value } => Content::Text(value.clone()),
            ContentsFile::Code { value } => Content::Code(value.clone()),
            ContentsFile::Image {
                url,
                asset_name,
                transform,
            } => {
                let bytes = load_asset_bytes(&ctx.assets, asset_name, url)?;
                let decoded = decode_image(bytes)
                    .map_err(|error| AppError::AssetLoad(format!("{asset_name}: {error}")))?;
                let mut image = ImageContent::new(
                    key,
                    asset_name.clone(),
                    decoded.mime,
                    transform.map(|value| value.rotation).unwrap_or_default(),
                    ImageState::Loaded {
                        bytes: decoded.bytes,
                        pixel_size: decoded.pixel_size,
                    },
                    ctx,
                );
                image.rescale(geometry.width, geometry.height);
                Content::Image(image)
            }
        };
        Ok(Self::with_content(key, id.to_string(), geometry, content, ctx))
    }

    /// Image item that keeps geometry and asset reference but has no pixels.
    /// Returns `None` for non-image data.
    pub fn image_placeholder(id: &str, data: &ItemFile, reason: String, ctx: &Context) -> Option<Self> {
        let ContentsFile::Image {
            url,
            asset_name,
            transform,
        } = &data.contents
        else {
            return None;
        };
        let geometry = Rect::from_array(data.geometry);
        let key = EntityKey::next();
        let mut image = ImageContent::new(
            key,
            asset_name.clone(),
            ImageMime::Png,
            transform.map(|value| value.rotation).unwrap_or_default(),
            ImageState::Missing {
                url: url.clone(),
                reason,
            },
            ctx,
        );
        image.rescale(geometry.width, geometry.height);
        Some(Self::with_content(key, id.to_string(), geometry, Content::Image(image), ctx))
    }

    fn modified(&self) {
        self.observer.notify(ModelEvent::Modified {
            kind: EntityKind::Item,
            key: self.key,
            parent: self.page,
            id: self.id.clone(),
        });
    }
}

fn load_asset_bytes(assets: &AssetStore, asset_name: &str, url: &str) -> AppResult<Vec<u8>> {
    let primary = match assets.load(asset_name) {
        Ok(bytes) => return Ok(bytes),
        Err(error) => error,
    };
    // imported notebooks may still point at a file outside the asset dir
    let path = assets.resolve_url(url)?;
    if path == assets.resolve(asset_name) {
        return Err(primary);
    }
    fs::read(&path)
        .map_err(|error| AppError::AssetLoad(format!("{}: {}", path.to_string_lossy(), error)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::test_support::{data_url, gif_bytes, png_bytes};
    use crate::fetch::FileFetcher;

    fn context() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().expect("temp dir");
        let ctx = Context::detached(AssetStore::new(dir.path().join("assets")));
        (dir, ctx)
    }

    fn png_item(ctx: &Context, width: u32, height: u32) -> Item {
        let fetcher = FileFetcher::new(ctx.assets.clone());
        Item::new_image(
            "Image",
            Rect::new(10, 10, 200, 50),
            &data_url(&png_bytes(width, height)),
            &fetcher,
            ctx,
            true,
        )
        .expect("image item")
    }

    #[test]
    fn image_height_follows_width_and_png_is_written_lazily() {
        let (_dir, ctx) = context();
        let item = png_item(&ctx, 400, 100);
        let image = item.image().expect("image content");

        assert_eq!(image.display_size(), Size::new(200, 50));
        assert_eq!(item.geometry().height, 50 + ITEM_CHROME_HEIGHT);
        assert_eq!(image.mime(), ImageMime::Png);
        assert!(!ctx.assets.exists(image.asset_name()));
    }

    #[test]
    fn gif_assets_are_written_at_creation() {
        let (dir, ctx) = context();
        let path = dir.path().join("anim.gif");
        fs::write(&path, gif_bytes(10, 10)).expect("write gif");
        let fetcher = FileFetcher::new(ctx.assets.clone());

        let item = Item::new_image(
            "Image",
            Rect::new(0, 0, 20, 20),
            &path.to_string_lossy(),
            &fetcher,
            &ctx,
            false,
        )
        .expect("gif item");
        let image = item.image().expect("image content");
        assert_eq!(image.mime(), ImageMime::Gif);
        assert!(ctx.assets.exists(image.asset_name()));
        assert_eq!(item.geometry(), Rect::new(0, 0, 20, 20));
    }

    #[test]
    fn unreachable_source_fails_without_an_item() {
        let (_dir, ctx) = context();
        let fetcher = FileFetcher::new(ctx.assets.clone());
        let error = Item::new_image("Image", Rect::new(0, 0, 10, 10), "nope.png", &fetcher, &ctx, true)
            .expect_err("missing source");
        assert!(matches!(error, AppError::ContentFetch(_)));
    }

    #[test]
    fn quarter_turns_swap_the_scaled_axes() {
        let (_dir, ctx) = context();
        let mut item = png_item(&ctx, 400, 100);
        assert!(item.rotate(Rotation::Deg90).expect("rotate"));
        assert_eq!(item.image().map(ImageContent::display_size), Some(Size::new(200, 800)));
        assert_eq!(item.geometry(), Rect::new(10, 10, 200, 800 + ITEM_CHROME_HEIGHT));

        assert!(item.rotate(Rotation::Deg180).expect("rotate"));
        assert_eq!(item.image().map(ImageContent::display_size), Some(Size::new(200, 50)));
        assert_eq!(item.geometry().height, 50 + ITEM_CHROME_HEIGHT);
        assert!(!item.rotate(Rotation::Deg180).expect("same turn"));
    }

    #[test]
    fn geometry_change_arms_debounced_resize() {
        let (_dir, ctx) = context();
        let mut item = png_item(&ctx, 400, 100);
        let mut moved = item.geometry();
        moved.width = 100;

        assert!(item.set_geometry(moved));
        let image = item.image().expect("image");
        assert!(image.resize_pending());
        assert_eq!(image.display_size(), Size::new(200, 50));

        assert!(item.flush_pending_resize());
        assert_eq!(item.image().map(ImageContent::display_size), Some(Size::new(100, 25)));
        assert!(!item.set_geometry(moved));
    }

    #[test]
    fn resize_timer_only_accepts_the_armed_generation() {
        let (_dir, ctx) = context();
        let mut item = png_item(&ctx, 400, 100);
        let key = TimerKey::ImageResize(item.key());
        let mut wider = item.geometry();
        wider.width = 300;
        item.set_geometry(wider);
        wider.width = 400;
        item.set_geometry(wider);

        assert!(!item.on_resize_timer(&TimerFired { key, generation: 1 }));
        assert!(item.on_resize_timer(&TimerFired { key, generation: 2 }));
        assert_eq!(item.image().map(ImageContent::display_size), Some(Size::new(400, 100)));
    }

    #[test]
    fn text_converts_to_code_and_keeps_blob() {
        let (_dir, ctx) = context();
        let mut item = Item::new_text("Text Box", Rect::new(0, 0, 400, 100), "fn main() {}", &ctx);
        assert!(item.convert(ItemKind::Code).expect("convert"));
        assert_eq!(item.kind(), ItemKind::Code);
        assert_eq!(item.text(), Some("fn main() {}"));
        assert!(!item.convert(ItemKind::Code).expect("already code"));

        let mut image = png_item(&ctx, 4, 4);
        assert!(matches!(image.convert(ItemKind::Text), Err(AppError::Unsupported(_))));
        assert!(matches!(image.set_content("x".to_string()), Err(AppError::Unsupported(_))));
    }

    #[test]
    fn marshal_writes_asset_once_with_relative_url() {
        let (_dir, ctx) = context();
        let mut item = png_item(&ctx, 40, 20);
        item.rotate(Rotation::Deg270).expect("rotate");
        let data = item.marshal(&ctx.assets).expect("marshal");
        let asset_name = item.image().map(|image| image.asset_name().to_string()).expect("image");

        match &data.contents {
            ContentsFile::Image {
                url,
                asset_name: stored,
                transform,
            } => {
                assert_eq!(url, &format!("file:{asset_name}.fna"));
                assert_eq!(stored, &asset_name);
                assert_eq!(transform.map(|value| value.rotation), Some(Rotation::Deg270));
            }
            other => panic!("unexpected contents {other:?}"),
        }
        assert!(ctx.assets.exists(&asset_name));

        let reloaded = Item::unmarshal("Image", &data, &ctx).expect("unmarshal");
        let image = reloaded.image().expect("image");
        assert_eq!(image.asset_name(), asset_name);
        assert_eq!(image.rotation(), Rotation::Deg270);
        assert_eq!(image.pixel_size(), Some(Size::new(40, 20)));
        assert_eq!(reloaded.geometry(), item.geometry());
    }

    #[test]
    fn missing_asset_fails_load_and_placeholder_keeps_reference() {
        let (_dir, ctx) = context();
        let data = ItemFile {
            geometry: [5, 5, 120, 90],
            contents: ContentsFile::Image {
                url: "file:lost.fna".to_string(),
                asset_name: "lost".to_string(),
                transform: None,
            },
        };
        let error = Item::unmarshal("Image", &data, &ctx).expect_err("missing asset");
        assert!(matches!(error, AppError::AssetLoad(_)));

        let placeholder =
            Item::image_placeholder("Image", &data, error.to_string(), &ctx).expect("placeholder");
        let image = placeholder.image().expect("image");
        assert!(image.is_missing());
        assert_eq!(image.display_size(), Size::new(120, 60));
        assert_eq!(placeholder.marshal(&ctx.assets).expect("marshal"), data);
        assert!(!ctx.assets.exists("lost"));
    }

    #[test]
    fn text_items_never_touch_the_asset_store() {
        let (_dir, ctx) = context();
        let item = Item::new_text("Text Box", Rect::new(0, 0, 1, 1), "", &ctx);
        assert_eq!(item.release_asset(&ctx.assets), None);

        let image = png_item(&ctx, 2, 2);
        image.marshal(&ctx.assets).expect("persist asset");
        assert_eq!(image.release_asset(&ctx.assets), Some(true));
        assert_eq!(image.release_asset(&ctx.assets), Some(false));
    }
}
