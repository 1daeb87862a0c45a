//! Image loader service
//!
//! Explicitly constructed service object with an initialize/shutdown
//! lifecycle; no global state. Owns the cache, the scheduler and the external
//! collaborators, and routes incoming messages to request tasks.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{CacheStore, ImageCache};
use crate::config::LoaderConfig;
use crate::fetch::{SourceFetcher, ThumbnailGenerator};
use crate::raw::RawDecoder;
use crate::request::LoadImageRequest;
use crate::scheduler::{derive_concurrency_limit, detect_available_memory, Scheduler};
use crate::task::{ImageRequestTask, ResponseSender, TaskContext};

/// One image-loading service instance
pub struct ImageLoaderService<S: CacheStore> {
    ctx: TaskContext<S>,
    scheduler: Arc<Scheduler>,
    restart_rx: watch::Receiver<u64>,
}

impl<S: CacheStore + 'static> ImageLoaderService<S> {
    pub fn new(
        config: LoaderConfig,
        store: Arc<S>,
        fetcher: Arc<dyn SourceFetcher>,
        thumbnailer: Arc<dyn ThumbnailGenerator>,
        raw_decoder: Arc<dyn RawDecoder>,
    ) -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let limit = derive_concurrency_limit(
            parallelism,
            detect_available_memory(),
            &config.scheduler,
        );
        info!(limit, "derived concurrency limit");

        let (restart_tx, restart_rx) = watch::channel(0u64);
        let ctx = TaskContext {
            cache: Arc::new(ImageCache::new(store, config.cache)),
            fetcher,
            thumbnailer,
            raw_decoder,
            decoder_restart: Arc::new(restart_tx),
        };

        Self {
            ctx,
            scheduler: Scheduler::new(limit),
            restart_rx,
        }
    }

    /// Open the cache and begin admitting queued work.
    ///
    /// A broken cache store degrades to a permanently-missing cache rather
    /// than failing the service.
    pub async fn initialize(&self) {
        if let Err(e) = self.ctx.cache.initialize().await {
            warn!(error = %e, "cache initialization failed, serving without cache");
        }
        self.scheduler.start();
    }

    /// Route one incoming message: a load request becomes a scheduled task,
    /// a `cancel=true` message retires the named task
    pub fn submit(&self, request: LoadImageRequest, responder: ResponseSender) {
        if request.cancel {
            self.scheduler.remove(request.task_id);
            return;
        }
        let task = ImageRequestTask::new(request, self.ctx.clone(), responder);
        self.scheduler.add(task);
    }

    /// Cancel everything, queued and active
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    /// Watch channel bumped whenever the RAW decoder subsystem must be
    /// restarted by the host
    pub fn decoder_restart_signal(&self) -> watch::Receiver<u64> {
        self.restart_rx.clone()
    }

    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    pub fn pending_count(&self) -> usize {
        self.scheduler.pending_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::LoaderError;
    use crate::fetch::{FetchedBytes, SourceKind};
    use crate::geometry::Orientation;
    use crate::raw::RawDecodeResponse;
    use crate::request::{LoadImageResponse, DEFAULT_PRIORITY};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::io::Cursor;

    struct PngFetcher;

    #[async_trait]
    impl SourceFetcher for PngFetcher {
        async fn fetch(&self, _url: &str) -> Result<FetchedBytes, LoaderError> {
            let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([1, 2, 3, 255]));
            let mut buffer = Cursor::new(Vec::new());
            image::DynamicImage::ImageRgba8(img)
                .write_to(&mut buffer, image::ImageFormat::Png)
                .unwrap();
            Ok(FetchedBytes {
                mime_type: "image/png".to_string(),
                data: Bytes::from(buffer.into_inner()),
            })
        }
    }

    struct NoThumbnailer;

    #[async_trait]
    impl ThumbnailGenerator for NoThumbnailer {
        async fn generate(
            &self,
            _url: &str,
            _kind: SourceKind,
        ) -> Result<FetchedBytes, LoaderError> {
            Err(LoaderError::fetch_failed("thumbnailer unavailable"))
        }
    }

    struct IdleRawDecoder;

    #[async_trait]
    impl RawDecoder for IdleRawDecoder {
        async fn decode(&self, _source: &[u8]) -> Result<RawDecodeResponse, LoaderError> {
            Ok(RawDecodeResponse::default())
        }

        fn is_failed(&self) -> bool {
            false
        }
    }

    fn service() -> ImageLoaderService<MemoryStore> {
        ImageLoaderService::new(
            LoaderConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(PngFetcher),
            Arc::new(NoThumbnailer),
            Arc::new(IdleRawDecoder),
        )
    }

    fn request(task_id: u64) -> LoadImageRequest {
        LoadImageRequest {
            url: Some("file:///photo.png".to_string()),
            orientation: Orientation::identity(),
            scale: None,
            width: None,
            height: None,
            max_width: None,
            max_height: None,
            crop: false,
            task_id,
            cancel: false,
            timestamp: None,
            cache: false,
            priority: DEFAULT_PRIORITY,
        }
    }

    fn channel_responder() -> (
        ResponseSender,
        tokio::sync::mpsc::UnboundedReceiver<LoadImageResponse>,
    ) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let responder: ResponseSender = Box::new(move |resp| {
            let _ = tx.send(resp);
        });
        (responder, rx)
    }

    #[tokio::test]
    async fn test_submit_and_respond() {
        let service = service();
        service.initialize().await;

        let (responder, mut rx) = channel_responder();
        service.submit(request(1), responder);

        let resp = rx.recv().await.unwrap();
        assert_eq!(resp.task_id, 1);
        assert_eq!(resp.status, crate::request::ResponseStatus::Success);
    }

    #[tokio::test]
    async fn test_cancel_message_retires_queued_task() {
        let service = service();
        // Not initialized: tasks park in the new set.
        let (responder, mut rx) = channel_responder();
        service.submit(request(5), responder);

        let mut cancel = request(5);
        cancel.cancel = true;
        service.submit(cancel, Box::new(|_| {}));
        assert_eq!(service.pending_count(), 0);

        service.initialize().await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_restart_signal_starts_quiet() {
        let service = service();
        let rx = service.decoder_restart_signal();
        assert_eq!(*rx.borrow(), 0);
    }

    #[test]
    fn test_responses_shared_with_lock() {
        // ResponseSender must be usable from spawned tasks.
        let sink: Arc<Mutex<Vec<LoadImageResponse>>> = Arc::new(Mutex::new(Vec::new()));
        let shared = sink.clone();
        let responder: ResponseSender = Box::new(move |resp| shared.lock().push(resp));
        responder(LoadImageResponse::error(9));
        assert_eq!(sink.lock().len(), 1);
    }
}
