use crate::assets::AssetStore;
use crate::document::page::Page;
use crate::document::{claim_id, rename_in, validate_id, Context, Renameable, Slot};
use crate::errors::{AppError, AppResult};
use crate::events::{EntityKey, EntityKind, ModelEvent};
use crate::ids::{display_label, next_id, shorten_label, IdScheme};
use crate::models::{OrderedMap, SectionFile, Size};
use std::collections::HashSet;

pub const PAGE_PREFIX: &str = "page";
pub const NEW_PAGE_LABEL: &str = "New Page";

#[derive(Debug)]
pub struct Section {
    key: EntityKey,
    id: String,
    ids: HashSet<String>,
    pages: Vec<Page>,
    ctx: Context,
}

impl Section {
    pub fn new(id: impl Into<String>, ctx: &Context) -> Self {
        Self {
            key: EntityKey::next(),
            id: id.into(),
            ids: HashSet::new(),
            pages: Vec::new(),
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

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: &str) -> Option<&Page> {
        self.pages.iter().find(|page| page.id() == id)
    }

    pub fn page_mut(&mut self, id: &str) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id() == id)
    }

    pub fn page_at_mut(&mut self, index: usize) -> Option<&mut Page> {
        self.pages.get_mut(index)
    }

    pub fn viewport(&self) -> Size {
        self.ctx.viewport
    }

    pub fn add_page(&mut self, mut page: Page) -> AppResult<usize> {
        claim_id(&self.ids, EntityKind::Page, page.id())?;
        page.set_viewport(self.ctx.viewport);
        self.ids.insert(page.id().to_string());
        self.ctx.observer.notify(ModelEvent::Added {
            kind: EntityKind::Page,
            key: page.key(),
            parent: Some(self.key),
            id: page.id().to_string(),
        });
        self.pages.push(page);
        Ok(self.pages.len() - 1)
    }

    pub fn new_page(&mut self) -> AppResult<usize> {
        let id = next_id(PAGE_PREFIX, IdScheme::Numeric, &self.ids)?;
        let page = Page::new(id, &self.ctx);
        self.add_page(page)
    }

    /// Removes the page and deletes the assets of its image items.
    pub fn remove_page(&mut self, index: usize) -> AppResult<Page> {
        if index >= self.pages.len() {
            return Err(AppError::NotFound(format!(
                "section '{}' has no page at index {}",
                self.id, index
            )));
        }
        let page = self.pages.remove(index);
        self.ids.remove(page.id());
        let deleted = page.release_assets();
        tracing::debug!(
            section = self.id.as_str(),
            page = page.id(),
            assets_deleted = deleted,
            "page removed"
        );
        self.ctx.observer.notify(ModelEvent::Removed {
            kind: EntityKind::Page,
            key: page.key(),
            parent: Some(self.key),
            id: page.id().to_string(),
        });
        Ok(page)
    }

    /// Pages followed by the trailing "New Page" slot.
    pub fn slots(&self) -> Vec<Slot<'_, Page>> {
        self.pages
            .iter()
            .map(Slot::Child)
            .chain(std::iter::once(Slot::Placeholder))
            .collect()
    }

    /// Activating the placeholder slot creates a page. Returns the page index.
    pub fn activate_slot(&mut self, index: usize) -> AppResult<usize> {
        match index.cmp(&self.pages.len()) {
            std::cmp::Ordering::Less => Ok(index),
            std::cmp::Ordering::Equal => self.new_page(),
            std::cmp::Ordering::Greater => Err(AppError::NotFound(format!(
                "section '{}' has no tab at index {}",
                self.id, index
            ))),
        }
    }

    pub fn tab_labels(&self, max_chars: usize) -> Vec<String> {
        self.pages
            .iter()
            .map(|page| shorten_label(display_label(page.id(), PAGE_PREFIX), max_chars))
            .chain(std::iter::once(NEW_PAGE_LABEL.to_string()))
            .collect()
    }

    /// New pages are created at this size.
    pub fn set_viewport(&mut self, viewport: Size) {
        self.ctx.viewport = viewport;
        for page in &mut self.pages {
            page.set_viewport(viewport);
        }
    }

    pub fn find_page_mut(&mut self, key: EntityKey) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.key() == key)
    }

    pub fn find_item_page_mut(&mut self, item_key: EntityKey) -> Option<&mut Page> {
        self.pages
            .iter_mut()
            .find(|page| page.contains_item(item_key))
    }

    pub(crate) fn pages_mut(&mut self) -> impl Iterator<Item = &mut Page> {
        self.pages.iter_mut()
    }

    pub(crate) fn release_assets(&self) -> usize {
        self.pages.iter().map(Page::release_assets).sum()
    }

    pub fn marshal(&self, assets: &AssetStore) -> AppResult<SectionFile> {
        let mut pages = OrderedMap::new();
        for page in &self.pages {
            pages.push(page.id(), page.marshal(assets)?);
        }
        Ok(SectionFile { pages })
    }

    pub fn unmarshal(id: &str, data: &SectionFile, ctx: &Context) -> AppResult<Self> {
        validate_id(EntityKind::Section, id)?;
        let mut section = Self::new(id, ctx);
        for (page_id, page_data) in data.pages.iter() {
            claim_id(&section.ids, EntityKind::Page, page_id)?;
            let page = Page::unmarshal(page_id, page_data, ctx)?;
            section.ids.insert(page_id.to_string());
            section.pages.push(page);
        }
        Ok(section)
    }
}

impl Renameable for Section {
    fn try_rename(&mut self, current_id: &str, new_id: &str) -> AppResult<()> {
        let index = self
            .pages
            .iter()
            .position(|page| page.id() == current_id)
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "no page named '{}' in section '{}'",
                    current_id, self.id
                ))
            })?;
        if !rename_in(&mut self.ids, EntityKind::Page, current_id, new_id)? {
            return Ok(());
        }
        self.pages[index].set_id(new_id.to_string());
        self.ctx.observer.notify(ModelEvent::Renamed {
            kind: EntityKind::Page,
            key: self.pages[index].key(),
            parent: Some(self.key),
            from: current_id.to_string(),
            to: new_id.to_string(),
        });
        Ok(())
    }
}
