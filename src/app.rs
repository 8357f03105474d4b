use crate::assets::AssetStore;
use crate::binder::{Binder, LoadReport, SaveReport};
use crate::debounce::{TimerFired, TimerHandle, TimerKey};
use crate::document::Context;
use crate::errors::AppResult;
use crate::events::{ModelEvent, MutationObserver};
use crate::fetch::{FileFetcher, Prefetched, RemoteFetcher};
use crate::save::SaveCoordinator;
use crate::settings::AppSettings;
use std::future::Future;
use tokio::sync::mpsc;

/// Owns the document tree and the single loop that mutates it.
///
/// Entities report mutations over one channel and timers report firings over
/// another; both are drained here so the tree is only touched on this loop.
pub struct App {
    settings: AppSettings,
    binder: Binder,
    save: SaveCoordinator,
    fetcher: FileFetcher,
    remote: RemoteFetcher,
    events: mpsc::UnboundedReceiver<ModelEvent>,
    timers: mpsc::UnboundedReceiver<TimerFired>,
    subscribers: Vec<mpsc::UnboundedSender<ModelEvent>>,
    load_report: LoadReport,
    last_save: Option<SaveReport>,
}

impl App {
    pub fn open(settings: AppSettings) -> AppResult<Self> {
        let workspace_dir = settings.require_workspace_dir()?;
        let assets = AssetStore::new(settings.resolved_asset_dir(&workspace_dir));
        let (observer, events) = MutationObserver::channel();
        let (timer_handle, timers) = TimerHandle::channel();
        let ctx = Context::new(observer, timer_handle.clone(), assets.clone()).with_windows(
            settings.page_resize_interval(),
            settings.image_resize_interval(),
        );

        let mut binder = Binder::new(workspace_dir.clone(), ctx);
        let load_report = binder.load_workspace(&workspace_dir)?;
        // loading emits no mutations, so nothing else would consume the
        // post-load suppression
        binder.save();

        let save = SaveCoordinator::new(
            settings.auto_save,
            settings.auto_save_interval(),
            timer_handle,
        );
        let fetcher = FileFetcher::new(assets);
        let remote = RemoteFetcher::new(fetcher.clone())?;
        Ok(Self {
            settings,
            binder,
            save,
            fetcher,
            remote,
            events,
            timers,
            subscribers: Vec::new(),
            load_report,
            last_save: None,
        })
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    pub fn binder_mut(&mut self) -> &mut Binder {
        &mut self.binder
    }

    pub fn fetcher(&self) -> &FileFetcher {
        &self.fetcher
    }

    /// Resolves `source` ahead of item creation. Remote sources are
    /// downloaded; the result feeds `Page::new_image_item`.
    pub async fn prefetch(&self, source: &str) -> AppResult<Prefetched> {
        self.remote.prefetch(source).await
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    pub fn last_save(&self) -> Option<&SaveReport> {
        self.last_save.as_ref()
    }

    pub fn save_coordinator(&self) -> &SaveCoordinator {
        &self.save
    }

    /// Presentation hook: receives every model event after it is applied.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<ModelEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.push(sender);
        receiver
    }

    pub fn handle_event(&mut self, event: ModelEvent) {
        tracing::trace!(event = event.name(), "model event");
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        self.save.start();
    }

    pub fn handle_timer(&mut self, fired: TimerFired) {
        match fired.key {
            TimerKey::Save => {
                if self.save.accept(&fired) {
                    self.save_now();
                }
            }
            _ => {
                if !self.binder.route_timer(&fired) {
                    tracing::trace!(key = ?fired.key, "stale timer firing ignored");
                }
            }
        }
    }

    /// Handles everything already queued without waiting. Returns how many
    /// events and firings were processed.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            if let Ok(event) = self.events.try_recv() {
                self.handle_event(event);
            } else if let Ok(fired) = self.timers.try_recv() {
                self.handle_timer(fired);
            } else {
                return handled;
            }
            handled += 1;
        }
    }

    /// Waits for and handles the next event or timer firing.
    pub async fn next(&mut self) -> bool {
        tokio::select! {
            Some(event) = self.events.recv() => {
                self.handle_event(event);
                true
            }
            Some(fired) = self.timers.recv() => {
                self.handle_timer(fired);
                true
            }
            else => false,
        }
    }

    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Some(event) = self.events.recv() => self.handle_event(event),
                Some(fired) = self.timers.recv() => self.handle_timer(fired),
            }
        }
    }

    pub fn save_now(&mut self) -> &SaveReport {
        let report = self.binder.save();
        if !report.is_clean() {
            tracing::warn!(failed = report.failed.len(), "autosave finished with failures");
        }
        self.last_save.insert(report)
    }

    /// Drains queued work, settles pending layout and writes a final save.
    pub fn shutdown(mut self) -> SaveReport {
        self.pump();
        self.binder.flush_pending_layout();
        self.save.stop();
        let report = self.binder.save();
        tracing::info!(
            saved = report.saved.len(),
            failed = report.failed.len(),
            suppressed = report.suppressed,
            "final save"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::notebook::DEFAULT_NOTEBOOK_ID;
    use crate::errors::AppError;
    use crate::fetch::test_support::{png_bytes, serve};
    use crate::models::Size;
    use std::time::Duration;
    use tokio::time::Instant;

    fn settings_for(dir: &std::path::Path) -> AppSettings {
        AppSettings {
            workspace_dir: Some(dir.to_path_buf()),
            ..AppSettings::default()
        }
    }

    #[test]
    fn open_requires_an_existing_workspace() {
        let dir = tempfile::tempdir().expect("temp dir");
        let error = App::open(settings_for(&dir.path().join("missing"))).err().expect("missing");
        assert!(matches!(error, AppError::WorkspaceNotFound(_)));

        let error = App::open(AppSettings::default()).err().expect("unset");
        assert!(matches!(error, AppError::WorkspaceNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mutations_are_saved_once_after_the_window() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut app = App::open(settings_for(dir.path())).expect("open");
        assert!(app.load_report().seeded_default);
        let file = dir.path().join("notebook-My Notebook.fnbook");
        assert!(!file.exists());

        let began = Instant::now();
        let notebook = app.binder_mut().notebook_at_mut(0).expect("notebook");
        notebook.new_section().expect("section");
        notebook.new_section().expect("section");
        assert_eq!(app.pump(), 2);
        assert!(app.save_coordinator().is_pending());

        assert!(app.next().await);
        assert!(began.elapsed() >= Duration::from_secs(3));
        assert!(file.exists());
        let report = app.last_save().expect("saved");
        assert!(!report.suppressed);
        assert_eq!(report.saved, [DEFAULT_NOTEBOOK_ID]);
        assert_eq!(app.save_coordinator().fires(), 1);
        assert_eq!(app.save_coordinator().requests(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_autosave_still_saves_on_shutdown() {
        let dir = tempfile::tempdir().expect("temp dir");
        let settings = AppSettings {
            auto_save: false,
            ..settings_for(dir.path())
        };
        let mut app = App::open(settings).expect("open");
        app.binder_mut().new_notebook().expect("notebook");
        app.pump();
        assert!(!app.save_coordinator().is_pending());

        let report = app.shutdown();
        assert!(!report.suppressed);
        assert_eq!(report.saved.len(), 2);
        assert!(dir.path().join("notebook-My Notebook 1.fnbook").exists());
    }

    #[tokio::test]
    async fn subscribers_see_events_in_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut app = App::open(settings_for(dir.path())).expect("open");
        let mut events = app.subscribe();

        app.binder_mut()
            .rename_notebook(DEFAULT_NOTEBOOK_ID, "Journal")
            .expect("rename");
        app.binder_mut().new_notebook().expect("notebook");
        app.pump();

        let journal = app.binder().notebooks()[0].key();
        assert_eq!(
            events.try_recv().expect("renamed"),
            ModelEvent::Renamed {
                kind: crate::events::EntityKind::Notebook,
                key: journal,
                parent: None,
                from: DEFAULT_NOTEBOOK_ID.to_string(),
                to: "Journal".to_string(),
            }
        );
        assert_eq!(events.try_recv().expect("added").name(), "added");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn remote_images_are_prefetched_then_placed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut app = App::open(settings_for(dir.path())).expect("open");
        let base = serve("200 OK", png_bytes(400, 200)).await;
        let url = format!("{base}/photo.png");
        let prefetched = app.prefetch(&url).await.expect("download");

        let notebook = app.binder_mut().notebook_at_mut(0).expect("notebook");
        notebook.new_section().expect("section");
        let section = notebook.section_at_mut(0).expect("section");
        section.new_page().expect("page");
        let page = section.page_at_mut(0).expect("page");
        let index = page.new_image_item(5, 5, &url, &prefetched).expect("image");
        let image = page.items()[index].image().expect("image content");
        assert_eq!(image.pixel_size(), Some(Size::new(400, 200)));
        assert_eq!(image.display_size(), Size::new(200, 100));

        let report = app.shutdown();
        assert!(report.is_clean());
        let raw = std::fs::read_to_string(dir.path().join("notebook-My Notebook.fnbook"))
            .expect("notebook file");
        assert!(!raw.contains(&base));
    }

    #[tokio::test(start_paused = true)]
    async fn run_until_stops_on_shutdown_signal() {
        let dir = tempfile::tempdir().expect("temp dir");
        let mut app = App::open(settings_for(dir.path())).expect("open");
        app.binder_mut().new_notebook().expect("notebook");

        app.run_until(tokio::time::sleep(Duration::from_secs(10))).await;
        assert!(app.last_save().is_some());
        assert!(dir.path().join("notebook-My Notebook 1.fnbook").exists());
    }
}
