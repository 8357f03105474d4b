use crate::assets::AssetStore;
use crate::debounce::{Debouncer, TimerFired, TimerKey};
use crate::document::item::Item;
use crate::document::{claim_id, rename_in, Context, Renameable};
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKey, EntityKind, ModelEvent};
use crate::fetch::ContentFetcher;
use crate::ids::{next_id, IdScheme};
use crate::models::{ItemKind, OrderedMap, PageFile, Rect, Rotation, Size};
use std::collections::HashSet;

pub const TEXT_BOX_PREFIX: &str = "Text Box";
pub const IMAGE_PREFIX: &str = "Image";
pub const DEFAULT_TEXT_BOX_SIZE: Size = Size::new(400, 100);
pub const DEFAULT_IMAGE_WIDTH: i32 = 200;

/// Canvas of items. `items` order is z-order, index 0 is backmost.
///
/// The extent grows as soon as an item crosses an edge; shrinking waits for
/// the debounced full scan in `evaluate_extent`.
#[derive(Debug)]
pub struct Page {
    key: EntityKey,
    id: String,
    ids: HashSet<String>,
    items: Vec<Item>,
    geometry: Size,
    viewport: Size,
    bottom_max: Option<EntityKey>,
    right_max: Option<EntityKey>,
    shrink: Debouncer,
    ctx: Context,
}

impl Page {
    pub fn new(id: impl Into<String>, ctx: &Context) -> Self {
        let key = EntityKey::next();
        Self {
            key,
            id: id.into(),
            ids: HashSet::new(),
            items: Vec::new(),
            geometry: ctx.viewport,
            viewport: ctx.viewport,
            bottom_max: None,
            right_max: None,
            shrink: Debouncer::new(
                TimerKey::PageExtent(key),
                ctx.page_resize_window,
                ctx.timers.clone(),
            ),
            ctx: ctx.clone(),
        }
    }

    pub fn key(&self) -> EntityKey {
        self.key
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn set_id(&mut self, id: String) {
        self.id = id;
    }

    pub fn geometry(&self) -> Size {
        self.geometry
    }

    pub fn viewport(&self) -> Size {
        self.viewport
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id() == id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id() == id)
    }

    pub fn contains_item(&self, key: EntityKey) -> bool {
        self.items.iter().any(|item| item.key() == key)
    }

    pub fn right_max(&self) -> Option<EntityKey> {
        self.right_max
    }

    pub fn bottom_max(&self) -> Option<EntityKey> {
        self.bottom_max
    }

    pub fn shrink_pending(&self) -> bool {
        self.shrink.is_pending()
    }

    /// Appends `item` on top. Fails with `NameCollision` if the id is taken.
    pub fn add_item(&mut self, mut item: Item) -> AppResult<usize> {
        claim_id(&self.ids, EntityKind::Item, item.id())?;
        let index = self.items.len();
        item.set_z_index(index);
        item.attach(self.key);
        self.ids.insert(item.id().to_string());
        self.ctx.observer.notify(ModelEvent::Added {
            kind: EntityKind::Item,
            key: item.key(),
            parent: Some(self.key),
            id: item.id().to_string(),
        });
        self.items.push(item);
        self.on_item_edge_changed(index);
        Ok(index)
    }

    pub fn new_text_item(&mut self, x: i32, y: i32) -> AppResult<usize> {
        let id = next_id(TEXT_BOX_PREFIX, IdScheme::Labelled, &self.ids)?;
        let geometry = Rect::new(
            x,
            y,
            DEFAULT_TEXT_BOX_SIZE.width,
            DEFAULT_TEXT_BOX_SIZE.height,
        );
        let item = Item::new_text(id, geometry, String::new(), &self.ctx);
        self.add_item(item)
    }

    pub fn new_image_item(
        &mut self,
        x: i32,
        y: i32,
        source: &str,
        fetcher: &dyn ContentFetcher,
    ) -> AppResult<usize> {
        let id = next_id(IMAGE_PREFIX, IdScheme::Labelled, &self.ids)?;
        let geometry = Rect::new(x, y, DEFAULT_IMAGE_WIDTH, 0);
        let item = Item::new_image(id, geometry, source, fetcher, &self.ctx, true)?;
        self.add_item(item)
    }

    /// Permanently removes the item at `index` and deletes its image asset.
    pub fn remove_item(&mut self, index: usize) -> AppResult<Item> {
        if index >= self.items.len() {
            return Err(self.missing_index(index));
        }
        let item = self.items.remove(index);
        self.ids.remove(item.id());
        self.renumber_from(index);
        item.release_asset(&self.ctx.assets);
        self.ctx.observer.notify(ModelEvent::Removed {
            kind: EntityKind::Item,
            key: item.key(),
            parent: Some(self.key),
            id: item.id().to_string(),
        });

        let key = Some(item.key());
        let defined_extent = self.right_max == key || self.bottom_max == key;
        self.right_max = self.right_max.filter(|max| Some(*max) != key);
        self.bottom_max = self.bottom_max.filter(|max| Some(*max) != key);
        if defined_extent || self.items.is_empty() {
            self.shrink.start();
        }
        Ok(item)
    }

    pub fn delete_item(&mut self, id: &str) -> AppResult<Item> {
        let index = self.require_index(id)?;
        self.remove_item(index)
    }

    /// Moves the item to the top of the stack.
    pub fn raise_item(&mut self, index: usize) -> AppResult<()> {
        if index >= self.items.len() {
            return Err(self.missing_index(index));
        }
        let item = self.items.remove(index);
        self.items.push(item);
        self.renumber_from(index);
        let top = self.items.len() - 1;
        self.ctx.observer.notify(ModelEvent::Raised {
            page: self.key,
            key: self.items[top].key(),
            id: self.items[top].id().to_string(),
            z_index: top,
        });
        Ok(())
    }

    /// Moves the item to the bottom of the stack.
    pub fn lower_item(&mut self, index: usize) -> AppResult<()> {
        if index >= self.items.len() {
            return Err(self.missing_index(index));
        }
        let item = self.items.remove(index);
        self.items.insert(0, item);
        self.renumber_from(0);
        self.ctx.observer.notify(ModelEvent::Lowered {
            page: self.key,
            key: self.items[0].key(),
            id: self.items[0].id().to_string(),
            z_index: 0,
        });
        Ok(())
    }

    pub fn rename_item(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        self.try_rename(current_id, new_id)
    }

    pub fn set_item_geometry(&mut self, id: &str, geometry: Rect) -> AppResult<()> {
        let index = self.require_index(id)?;
        if self.items[index].set_geometry(geometry) {
            self.on_item_edge_changed(index);
        }
        Ok(())
    }

    pub fn set_item_content(&mut self, id: &str, blob: impl Into<String>) -> AppResult<()> {
        let index = self.require_index(id)?;
        self.items[index].set_content(blob.into())
    }

    pub fn convert_item(&mut self, id: &str, kind: ItemKind) -> AppResult<bool> {
        let index = self.require_index(id)?;
        self.items[index].convert(kind)
    }

    pub fn rotate_item(&mut self, id: &str, rotation: Rotation) -> AppResult<()> {
        let index = self.require_index(id)?;
        if self.items[index].rotate(rotation)? {
            self.on_item_edge_changed(index);
        }
        Ok(())
    }

    /// Edge check after the item at `index` moved or resized.
    pub fn on_item_edge_changed(&mut self, index: usize) {
        let Some(item) = self.items.get(index) else {
            return;
        };
        let rect = item.geometry();
        let key = item.key();
        let mut shrink = false;

        if rect.right() > self.geometry.width {
            self.geometry.width = rect.right();
            self.right_max = Some(key);
        } else if self.right_max == Some(key) && rect.right() < self.geometry.width {
            shrink = true;
        }

        if rect.bottom() > self.geometry.height {
            self.geometry.height = rect.bottom();
            self.bottom_max = Some(key);
        } else if self.bottom_max == Some(key) && rect.bottom() < self.geometry.height {
            shrink = true;
        }

        if shrink {
            self.shrink.start();
        }
    }

    /// Full scan: extent becomes max(viewport, item edges).
    pub fn evaluate_extent(&mut self) {
        self.shrink.stop();
        let mut extent = self.viewport;
        self.right_max = None;
        self.bottom_max = None;
        for item in &self.items {
            let rect = item.geometry();
            if rect.right() > extent.width {
                extent.width = rect.right();
                self.right_max = Some(item.key());
            }
            if rect.bottom() > extent.height {
                extent.height = rect.bottom();
                self.bottom_max = Some(item.key());
            }
        }
        if extent != self.geometry {
            tracing::trace!(
                page = self.id.as_str(),
                width = extent.width,
                height = extent.height,
                "page extent re-evaluated"
            );
        }
        self.geometry = extent;
    }

    pub fn set_viewport(&mut self, viewport: Size) {
        self.viewport = viewport;
        self.evaluate_extent();
    }

    pub(crate) fn on_extent_timer(&mut self, fired: &TimerFired) -> bool {
        if self.shrink.accept(fired) {
            self.evaluate_extent();
            return true;
        }
        false
    }

    pub(crate) fn on_image_timer(&mut self, fired: &TimerFired) -> bool {
        self.items
            .iter_mut()
            .any(|item| item.on_resize_timer(fired))
    }

    /// Runs any debounced layout work right away.
    pub(crate) fn flush_pending(&mut self) {
        for item in &mut self.items {
            item.flush_pending_resize();
        }
        if self.shrink.take_pending() {
            self.evaluate_extent();
        }
    }

    pub(crate) fn release_assets(&self) -> usize {
        self.items
            .iter()
            .filter_map(|item| item.release_asset(&self.ctx.assets))
            .filter(|deleted| *deleted)
            .count()
    }

    pub fn marshal(&self, assets: &AssetStore) -> AppResult<PageFile> {
        let mut items = OrderedMap::new();
        for item in &self.items {
            items.push(item.id(), item.marshal(assets)?);
        }
        Ok(PageFile {
            geometry: self.geometry.to_array(),
            items,
        })
    }

    /// Item order in `data` becomes z-order. An image whose asset cannot be
    /// read is kept as a placeholder so the rest of the page still loads.
    /// The stored extent is not trusted; it is re-derived from the items.
    pub fn unmarshal(id: &str, data: &PageFile, ctx: &Context) -> AppResult<Self> {
        let mut page = Self::new(id, ctx);
        for (item_id, item_data) in data.items.iter() {
            claim_id(&page.ids, EntityKind::Item, item_id)?;
            let mut item = match Item::unmarshal(item_id, item_data, ctx) {
                Ok(item) => item,
                Err(error) => {
                    tracing::warn!(
                        page = id,
                        item = item_id,
                        error = %error,
                        "image asset unavailable; keeping placeholder"
                    );
                    match Item::image_placeholder(item_id, item_data, error.to_string(), ctx) {
                        Some(placeholder) => placeholder,
                        None => return Err(error),
                    }
                }
            };
            item.attach(page.key);
            page.ids.insert(item_id.to_string());
            page.items.push(item);
        }
        page.renumber_from(0);
        page.evaluate_extent();
        if page.geometry != Size::from_array(data.geometry) {
            tracing::debug!(
                page = id,
                stored_width = data.geometry[0],
                stored_height = data.geometry[1],
                width = page.geometry.width,
                height = page.geometry.height,
                "stored page extent settled"
            );
        }
        Ok(page)
    }

    fn renumber_from(&mut self, start: usize) {
        for (index, item) in self.items.iter_mut().enumerate().skip(start) {
            item.set_z_index(index);
        }
    }

    fn require_index(&self, id: &str) -> AppResult<usize> {
        self.index_of(id).ok_or_else(|| {
            AppError::NotFound(format!("no item named '{}' on page '{}'", id, self.id))
        })
    }

    fn missing_index(&self, index: usize) -> AppError {
        AppError::NotFound(format!(
            "page '{}' has no item at index {} ({} items)",
            self.id,
            index,
            self.items.len()
        ))
    }
}

impl Renameable for Page {
    fn try_rename(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        let index = self.require_index(current_id)?;
        if !rename_in(&mut self.ids, EntityKind::Item, current_id, new_id)? {
            return Ok(());
        }
        self.items[index].set_id(new_id.to_string());
        self.ctx.observer.notify(ModelEvent::Renamed {
            kind: EntityKind::Item,
            key: self.items[index].key(),
            parent: Some(self.key),
            from: current_id.to_string(),
            to: new_id.to_string(),
        });
        Ok(())
    }
}
