//! Geometry engine
//!
//! Pure functions computing orientation-corrected resize/crop parameters.
//! Given source dimensions and request options, these determine the target
//! dimensions and the source/target/canvas rectangles a single downstream
//! orientation-aware paint call needs.

mod orientation;

pub use orientation::Orientation;

/// Integer pixel size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Integer pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// The dimension-affecting subset of a load request
#[derive(Debug, Clone, Default)]
pub struct TransformOptions {
    pub scale: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub crop: bool,
    pub orientation: Orientation,
}

/// Copy parameters for one orientation-aware paint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyParameters {
    /// Region of the decoded source to read
    pub source: Rect,
    /// Pre-orientation region to paint into
    pub target: Rect,
    /// Final output surface size, after orientation cancellation
    pub canvas: Size,
}

/// Compute target dimensions for a request.
///
/// Order of application: `scale`, orientation size-cancellation (axis swap
/// for 90°/270° maps), proportional shrink-only clamp to
/// `max_width`/`max_height`, then explicit `width`/`height` which win over
/// every other constraint.
pub fn resize_dimensions(width: u32, height: u32, options: &TransformOptions) -> Size {
    let scale = options.scale.unwrap_or(1.0);
    let mut w = f64::from(width) * scale;
    let mut h = f64::from(height) * scale;

    if options.orientation.swaps_dimensions() {
        std::mem::swap(&mut w, &mut h);
    }

    let mut ratio: f64 = 1.0;
    if let Some(max_width) = options.max_width {
        if w > f64::from(max_width) {
            ratio = ratio.min(f64::from(max_width) / w);
        }
    }
    if let Some(max_height) = options.max_height {
        if h > f64::from(max_height) {
            ratio = ratio.min(f64::from(max_height) / h);
        }
    }
    w *= ratio;
    h *= ratio;

    if let Some(exact_width) = options.width {
        w = f64::from(exact_width);
    }
    if let Some(exact_height) = options.height {
        h = f64::from(exact_height);
    }

    Size::new(w.round() as u32, h.round() as u32)
}

/// Compute the copy parameters for one request.
///
/// With `crop` the output is a fixed square read from the centered square of
/// the source; otherwise the canvas is `resize_dimensions` and the
/// pre-orientation target is the canvas run through the orientation's
/// inverse size-cancellation.
///
/// # Panics
///
/// A crop request must supply equal `width` and `height`; violating this is
/// a programming error, not a recoverable condition.
pub fn calculate_copy_parameters(source: Size, options: &TransformOptions) -> CopyParameters {
    if options.crop {
        let width = options.width.unwrap_or(0);
        let height = options.height.unwrap_or(0);
        assert!(
            width == height && width > 0,
            "crop requires equal non-zero width and height, got {}x{}",
            width,
            height
        );

        let side = source.width.min(source.height);
        let source_rect = Rect::new(
            (source.width - side) / 2,
            (source.height - side) / 2,
            side,
            side,
        );

        let canvas = Size::new(width, height);
        let (tw, th) = options
            .orientation
            .inverse()
            .apply_to_size(canvas.width, canvas.height);
        return CopyParameters {
            source: source_rect,
            target: Rect::new(0, 0, tw, th),
            canvas,
        };
    }

    let canvas = resize_dimensions(source.width, source.height, options);
    let (tw, th) = options
        .orientation
        .inverse()
        .apply_to_size(canvas.width, canvas.height);

    CopyParameters {
        source: Rect::new(0, 0, source.width, source.height),
        target: Rect::new(0, 0, tw, th),
        canvas,
    }
}

/// Whether the request requires any pixel processing.
///
/// True iff the computed target dimensions differ from the source or the
/// orientation is non-identity; otherwise the original bytes can be reused
/// verbatim without a redundant re-encode.
pub fn should_process(width: u32, height: u32, options: &TransformOptions) -> bool {
    let target = resize_dimensions(width, height, options);
    target.width != width || target.height != height || !options.orientation.is_identity()
}
