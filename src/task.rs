//! Per-request task state machine
//!
//! One task per in-flight request, driving cache probe → fetch → decode →
//! transform → respond → cache write. A cancellation flag is checked after
//! every suspension point; the in-flight fetch carries an abort handle so
//! cancelling an active task releases its concurrency slot promptly.

use std::io::Cursor;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use fast_image_resize::{FilterType, Image, PixelType, ResizeAlg, Resizer};
use futures::future::{AbortHandle, Abortable};
use image::io::Reader as ImageReader;
use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info_span, warn, Instrument};

use crate::cache::{CacheStore, ImageCache};
use crate::error::LoaderError;
use crate::fetch::{
    decode_data_uri, encode_data_uri, FetchedBytes, SourceFetcher, SourceKind, ThumbnailGenerator,
};
use crate::geometry::{calculate_copy_parameters, should_process, Size};
use crate::raw::{self, RawDecoder};
use crate::request::{LoadImageRequest, LoadImageResponse};
use crate::scheduler::ScheduledTask;

/// Delivers the task's single terminal message to the caller
pub type ResponseSender = Box<dyn Fn(LoadImageResponse) + Send + Sync>;

/// Collaborators shared by every task of one service instance
pub struct TaskContext<S: CacheStore> {
    pub cache: Arc<ImageCache<S>>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub thumbnailer: Arc<dyn ThumbnailGenerator>,
    pub raw_decoder: Arc<dyn RawDecoder>,
    /// Bumped to tell the host the decoder subsystem must be restarted
    pub decoder_restart: Arc<watch::Sender<u64>>,
}

impl<S: CacheStore> Clone for TaskContext<S> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            fetcher: self.fetcher.clone(),
            thumbnailer: self.thumbnailer.clone(),
            raw_decoder: self.raw_decoder.clone(),
            decoder_restart: self.decoder_restart.clone(),
        }
    }
}

/// Output of the fetch/decode stages, ready for the transform stage
struct SourceImage {
    mime_type: String,
    bytes: Bytes,
    image: DynamicImage,
    /// Orientation to cancel during transform. For RAW sources this comes
    /// from the decoder and overrides the request's stated orientation for
    /// this one decode; the cache key is unaffected.
    orientation: crate::geometry::Orientation,
    ifd: Option<serde_json::Value>,
}

/// One in-flight load request
pub struct ImageRequestTask<S: CacheStore> {
    request: LoadImageRequest,
    ctx: TaskContext<S>,
    responder: ResponseSender,
    cancelled: AtomicBool,
    responded: AtomicBool,
    cancel_count: AtomicU32,
    fetch_abort: Mutex<Option<AbortHandle>>,
}

impl<S: CacheStore + 'static> ImageRequestTask<S> {
    pub fn new(
        request: LoadImageRequest,
        ctx: TaskContext<S>,
        responder: ResponseSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            request,
            ctx,
            responder,
            cancelled: AtomicBool::new(false),
            responded: AtomicBool::new(false),
            cancel_count: AtomicU32::new(0),
            fetch_abort: Mutex::new(None),
        })
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn cancel_count(&self) -> u32 {
        self.cancel_count.load(Ordering::SeqCst)
    }

    /// Emit the terminal message at most once
    fn try_respond(&self, response: LoadImageResponse) {
        if self.responded.swap(true, Ordering::SeqCst) {
            return;
        }
        (self.responder)(response);
    }

    fn ensure_live(&self) -> Result<(), LoaderError> {
        if self.is_cancelled() {
            Err(LoaderError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Await a fetch future while keeping its abort handle registered, so
    /// `cancel` can cut the I/O short
    async fn abortable<F>(&self, fut: F) -> Result<FetchedBytes, LoaderError>
    where
        F: std::future::Future<Output = Result<FetchedBytes, LoaderError>> + Send,
    {
        let (handle, registration) = AbortHandle::new_pair();
        *self.fetch_abort.lock() = Some(handle);
        let result = Abortable::new(fut, registration).await;
        *self.fetch_abort.lock() = None;
        match result {
            Ok(inner) => inner,
            Err(_aborted) => Err(LoaderError::Cancelled),
        }
    }

    async fn execute(&self) -> Result<(), LoaderError> {
        let url = self
            .request
            .url
            .clone()
            .ok_or_else(|| LoaderError::invalid_request("load request without url"))?;
        let kind = SourceKind::resolve(&url);
        let cache_key = if self.request.cache {
            self.request.cache_key()
        } else {
            None
        };

        // Cache probe: requires a key and a source timestamp to compare
        // staleness against.
        if let (Some(key), Some(timestamp)) = (cache_key.as_deref(), self.request.timestamp) {
            if let Some(cached) = self.ctx.cache.load_image(key, timestamp).await {
                self.ensure_live()?;
                match String::from_utf8(cached.data.to_vec()) {
                    Ok(data_uri) => {
                        self.try_respond(LoadImageResponse::success(
                            self.request.task_id,
                            cached.width,
                            cached.height,
                            cached.ifd,
                            data_uri,
                        ));
                        return Ok(());
                    }
                    Err(_) => {
                        warn!(key, "cached payload is not a data URI, refetching");
                    }
                }
            }
            self.ensure_live()?;
        }

        let source = self.fetch_and_decode(&url, kind).await?;
        self.ensure_live()?;

        let (width, height, data_uri) = self.transform(&source)?;
        self.ensure_live()?;

        self.try_respond(LoadImageResponse::success(
            self.request.task_id,
            width,
            height,
            source.ifd.clone(),
            data_uri.clone(),
        ));

        // Best-effort cache write: the response is already out, so failures
        // here only cost a future miss.
        if let (Some(key), Some(timestamp)) = (cache_key.as_deref(), self.request.timestamp) {
            if let Err(e) = self
                .ctx
                .cache
                .save_image(
                    key,
                    timestamp,
                    width,
                    height,
                    source.ifd,
                    Bytes::from(data_uri.into_bytes()),
                )
                .await
            {
                warn!(key, error = %e, "cache write failed");
            }
        }

        Ok(())
    }

    async fn fetch_and_decode(
        &self,
        url: &str,
        kind: SourceKind,
    ) -> Result<SourceImage, LoaderError> {
        let (fetched, orientation, ifd) = match kind {
            SourceKind::InlineData => {
                (decode_data_uri(url)?, self.request.orientation, None)
            }
            SourceKind::Raster => {
                let fetched = self.abortable(self.ctx.fetcher.fetch(url)).await?;
                (fetched, self.request.orientation, None)
            }
            SourceKind::RawPhoto => {
                let raw_bytes = self.abortable(self.ctx.fetcher.fetch(url)).await?;
                self.ensure_live()?;
                let preview = raw::materialize(&*self.ctx.raw_decoder, &raw_bytes.data).await?;
                let fetched = FetchedBytes {
                    mime_type: preview.mime_type,
                    data: preview.data,
                };
                (fetched, preview.orientation, preview.ifd)
            }
            SourceKind::Video | SourceKind::Pdf | SourceKind::CloudDocument => {
                let fetched = self
                    .abortable(self.ctx.thumbnailer.generate(url, kind))
                    .await?;
                (fetched, self.request.orientation, None)
            }
        };
        self.ensure_live()?;

        let image = decode_image(&fetched.data)?;
        debug!(
            width = image.width(),
            height = image.height(),
            mime = %fetched.mime_type,
            "decoded source"
        );

        Ok(SourceImage {
            mime_type: fetched.mime_type,
            bytes: fetched.data,
            image,
            orientation,
            ifd,
        })
    }

    /// Transform stage: crop, resize, cancel orientation, re-encode. When
    /// no visual change is needed the fetched bytes are reused verbatim to
    /// avoid a redundant re-encode.
    fn transform(&self, source: &SourceImage) -> Result<(u32, u32, String), LoaderError> {
        let mut options = self.request.transform_options();
        options.orientation = source.orientation;

        let width = source.image.width();
        let height = source.image.height();

        if !should_process(width, height, &options) {
            let data_uri = encode_data_uri(&source.mime_type, &source.bytes);
            return Ok((width, height, data_uri));
        }

        let params = calculate_copy_parameters(Size::new(width, height), &options);

        let cropped = if params.source.x == 0
            && params.source.y == 0
            && params.source.width == width
            && params.source.height == height
        {
            source.image.clone()
        } else {
            source.image.crop_imm(
                params.source.x,
                params.source.y,
                params.source.width,
                params.source.height,
            )
        };

        let resized = if cropped.width() == params.target.width
            && cropped.height() == params.target.height
        {
            cropped
        } else {
            resize_image(&cropped, params.target.width, params.target.height)?
        };

        let upright = options.orientation.cancel_on_image(&resized);
        debug_assert_eq!(upright.width(), params.canvas.width);
        debug_assert_eq!(upright.height(), params.canvas.height);

        let (mime_type, encoded) = encode_image(&upright, &source.mime_type)?;
        Ok((
            upright.width(),
            upright.height(),
            encode_data_uri(mime_type, &encoded),
        ))
    }
}

#[async_trait]
impl<S: CacheStore + 'static> ScheduledTask for ImageRequestTask<S> {
    fn task_id(&self) -> u64 {
        self.request.task_id
    }

    fn priority(&self) -> u32 {
        self.request.priority
    }

    async fn run(self: Arc<Self>) {
        let span = info_span!(
            "image_request",
            task_id = self.request.task_id,
            url = self.request.url.as_deref().unwrap_or("")
        );
        async {
            if self.is_cancelled() {
                return;
            }
            match self.execute().await {
                Ok(()) => {}
                Err(LoaderError::Cancelled) => {
                    // Cancelled tasks send no terminal message; the caller
                    // asked for silence.
                    debug!("task cancelled");
                }
                Err(e) => {
                    warn!(error = %e, "request failed");
                    if e.is_subsystem_failure() {
                        self.ctx.decoder_restart.send_modify(|generation| {
                            *generation += 1;
                        });
                    }
                    self.try_respond(LoadImageResponse::error(self.request.task_id));
                }
            }
        }
        .instrument(span)
        .await;
    }

    fn cancel(&self) {
        self.cancel_count.fetch_add(1, Ordering::SeqCst);
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.fetch_abort.lock().take() {
            handle.abort();
        }
    }
}

fn decode_image(data: &[u8]) -> Result<DynamicImage, LoaderError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| LoaderError::decode_failed(e.to_string()))?
        .decode()
        .map_err(|e| LoaderError::decode_failed(e.to_string()))
}

/// Resize with Lanczos3 convolution
fn resize_image(img: &DynamicImage, target_w: u32, target_h: u32) -> Result<DynamicImage, LoaderError> {
    let src_width = NonZeroU32::new(img.width())
        .ok_or_else(|| LoaderError::transform_failed("source width is 0"))?;
    let src_height = NonZeroU32::new(img.height())
        .ok_or_else(|| LoaderError::transform_failed("source height is 0"))?;
    let dst_width = NonZeroU32::new(target_w)
        .ok_or_else(|| LoaderError::transform_failed("target width is 0"))?;
    let dst_height = NonZeroU32::new(target_h)
        .ok_or_else(|| LoaderError::transform_failed("target height is 0"))?;

    let src_image = Image::from_vec_u8(
        src_width,
        src_height,
        img.to_rgba8().into_raw(),
        PixelType::U8x4,
    )
    .map_err(|e| LoaderError::transform_failed(format!("source buffer: {:?}", e)))?;

    let mut dst_image = Image::new(dst_width, dst_height, PixelType::U8x4);
    let mut resizer = Resizer::new(ResizeAlg::Convolution(FilterType::Lanczos3));
    resizer
        .resize(&src_image.view(), &mut dst_image.view_mut())
        .map_err(|e| LoaderError::transform_failed(format!("resize: {:?}", e)))?;

    let buffer = image::RgbaImage::from_raw(target_w, target_h, dst_image.into_vec())
        .ok_or_else(|| LoaderError::transform_failed("output buffer size mismatch"))?;
    Ok(DynamicImage::ImageRgba8(buffer))
}

/// Re-encode the transformed image. JPEG sources stay JPEG; everything else
/// becomes PNG (lossless, alpha-capable).
fn encode_image(
    img: &DynamicImage,
    source_mime: &str,
) -> Result<(&'static str, Vec<u8>), LoaderError> {
    let mut buffer = Cursor::new(Vec::new());
    if source_mime == "image/jpeg" {
        // The JPEG encoder rejects alpha channels.
        let rgb = img.to_rgb8();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 90)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), image::ColorType::Rgb8)
            .map_err(|e| LoaderError::encode_failed("jpeg", e.to_string()))?;
        Ok(("image/jpeg", buffer.into_inner()))
    } else {
        img.write_to(&mut buffer, image::ImageFormat::Png)
            .map_err(|e| LoaderError::encode_failed("png", e.to_string()))?;
        Ok(("image/png", buffer.into_inner()))
    }
}
