use super::MediaError;
use base64::Engine;
use ffmpeg_next as ffmpeg;
use ffmpeg::format::Pixel;
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as Scaler, flag::Flags};
use ffmpeg::util::frame::Video as VideoFrame;
use image::{DynamicImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Offset into the clip used for `First`, past any undecoded lead-in frames.
pub const FIRST_FRAME_OFFSET: f64 = 0.1;
/// Distance from the end used for `Last`, so the seek stays inside the stream.
pub const LAST_FRAME_OFFSET: f64 = 0.1;
const END_MARGIN: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FramePosition {
    First,
    Last,
    /// Seconds from the start of the clip.
    At(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFrame {
    /// PNG-encoded still.
    pub png: Vec<u8>,
    pub timestamp_secs: f64,
    pub width: u32,
    pub height: u32,
}

impl ExtractedFrame {
    pub fn to_data_url(&self) -> String {
        format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&self.png)
        )
    }
}

/// Clamp the requested position into `[0, duration)`.
pub fn resolve_timestamp(position: FramePosition, duration: f64) -> f64 {
    let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
    let latest = (duration - END_MARGIN).max(0.0);

    match position {
        FramePosition::First => FIRST_FRAME_OFFSET.min(latest),
        FramePosition::Last => (duration - LAST_FRAME_OFFSET).max(0.0).min(latest),
        FramePosition::At(seconds) if seconds.is_finite() => seconds.clamp(0.0, latest),
        FramePosition::At(_) => 0.0,
    }
}

/// Decode the frame at `position` and encode it as PNG at the video's
/// native size. The input context and decoder are dropped on every return,
/// including when `stop` is cancelled between packets.
pub fn extract_frame(
    path: &Path,
    position: FramePosition,
    stop: &CancellationToken,
) -> Result<ExtractedFrame, MediaError> {
    ffmpeg::init()?;
    let mut context = ffmpeg::format::input(&path)?;

    let (stream_index, time_base, mut decoder, stream_duration) = {
        let stream = context
            .streams()
            .best(Type::Video)
            .ok_or_else(|| MediaError::NoVideoStream(path.display().to_string()))?;
        let decoder = ffmpeg::codec::context::Context::from_parameters(stream.parameters())?
            .decoder()
            .video()?;
        let stream_duration = (stream.duration() > 0)
            .then(|| stream.duration() as f64 * f64::from(stream.time_base()));
        (stream.index(), stream.time_base(), decoder, stream_duration)
    };

    let duration = if context.duration() > 0 {
        context.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)
    } else {
        stream_duration.unwrap_or(0.0)
    };

    let target = resolve_timestamp(position, duration);
    if target > 0.0 {
        let seek_to = (target * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
        context.seek(seek_to, ..seek_to)?;
    }
    let target_pts = (target / f64::from(time_base)) as i64;

    let mut decoded = VideoFrame::empty();
    let mut fallback: Option<VideoFrame> = None;

    for (stream, packet) in context.packets() {
        if stop.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        if stream.index() != stream_index {
            continue;
        }
        decoder
            .send_packet(&packet)
            .map_err(|e| MediaError::Decode(e.to_string()))?;
        while decoder.receive_frame(&mut decoded).is_ok() {
            if reached(&decoded, target_pts) {
                return rasterize(&decoded, f64::from(time_base), target);
            }
            fallback = Some(decoded.clone());
        }
    }

    decoder
        .send_eof()
        .map_err(|e| MediaError::Decode(e.to_string()))?;
    while decoder.receive_frame(&mut decoded).is_ok() {
        if stop.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        if reached(&decoded, target_pts) {
            return rasterize(&decoded, f64::from(time_base), target);
        }
        fallback = Some(decoded.clone());
    }

    // The stream ended before the target; the last decoded frame is the closest.
    match fallback {
        Some(frame) => rasterize(&frame, f64::from(time_base), target),
        None => Err(MediaError::Decode(format!(
            "no frame decoded near {:.3}s in {}",
            target,
            path.display()
        ))),
    }
}

fn reached(frame: &VideoFrame, target_pts: i64) -> bool {
    frame
        .timestamp()
        .or_else(|| frame.pts())
        .map_or(true, |pts| pts >= target_pts)
}

fn rasterize(frame: &VideoFrame, time_base: f64, requested: f64) -> Result<ExtractedFrame, MediaError> {
    let width = frame.width();
    let height = frame.height();

    let mut scaler = Scaler::get(
        frame.format(),
        width,
        height,
        Pixel::RGB24,
        width,
        height,
        Flags::BILINEAR,
    )?;
    let mut rgb = VideoFrame::empty();
    scaler.run(frame, &mut rgb)?;

    let image = RgbImage::from_raw(width, height, packed_rgb(&rgb, width, height))
        .ok_or_else(|| MediaError::Decode("decoded frame has an unexpected size".into()))?;

    let mut png = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    let timestamp_secs = frame
        .timestamp()
        .or_else(|| frame.pts())
        .map_or(requested, |pts| pts as f64 * time_base);

    Ok(ExtractedFrame {
        png,
        timestamp_secs,
        width,
        height,
    })
}

/// Copy plane 0 without the per-row padding ffmpeg may add.
fn packed_rgb(frame: &VideoFrame, width: u32, height: u32) -> Vec<u8> {
    let row = width as usize * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row {
        return data[..row * height as usize].to_vec();
    }
    let mut buffer = Vec::with_capacity(row * height as usize);
    for y in 0..height as usize {
        let start = y * stride;
        buffer.extend_from_slice(&data[start..start + row]);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_first_skips_lead_in() {
        assert_eq!(resolve_timestamp(FramePosition::First, 5.0), FIRST_FRAME_OFFSET);
    }

    #[test]
    fn test_last_backs_off_from_end() {
        let ts = resolve_timestamp(FramePosition::Last, 5.0);
        assert!((ts - 4.9).abs() < 1e-9);
        assert!(ts < 5.0);
    }

    #[test]
    fn test_explicit_offset_is_clamped() {
        assert_eq!(resolve_timestamp(FramePosition::At(-3.0), 5.0), 0.0);
        assert_eq!(resolve_timestamp(FramePosition::At(2.5), 5.0), 2.5);
        let past_end = resolve_timestamp(FramePosition::At(60.0), 5.0);
        assert!(past_end < 5.0 && past_end > 4.99);
        assert_eq!(resolve_timestamp(FramePosition::At(f64::NAN), 5.0), 0.0);
    }

    #[test]
    fn test_very_short_clip_stays_in_range() {
        let duration = 0.05;
        for position in [FramePosition::First, FramePosition::Last, FramePosition::At(1.0)] {
            let ts = resolve_timestamp(position, duration);
            assert!(ts >= 0.0 && ts < duration, "{:?} -> {}", position, ts);
        }
    }

    #[test]
    fn test_unknown_duration_resolves_to_start() {
        assert_eq!(resolve_timestamp(FramePosition::Last, 0.0), 0.0);
        assert_eq!(resolve_timestamp(FramePosition::First, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_data_url() {
        let frame = ExtractedFrame {
            png: vec![0x89, b'P', b'N', b'G'],
            timestamp_secs: 0.0,
            width: 1,
            height: 1,
        };
        assert_eq!(frame.to_data_url(), "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn test_extract_last_frame_from_fixture() {
        let path = PathBuf::from("tests/assets/sample.mp4");
        if !path.exists() {
            println!("Skipping test: {:?} not found", path);
            return;
        }
        let frame = extract_frame(&path, FramePosition::Last, &CancellationToken::new()).unwrap();
        assert!(frame.width > 0 && frame.height > 0);
        assert_eq!(&frame.png[1..4], b"PNG");
    }

    #[test]
    fn test_extract_from_missing_file_fails() {
        let result = extract_frame(
            Path::new("tests/assets/does-not-exist.mp4"),
            FramePosition::First,
            &CancellationToken::new(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stopped_extraction_gives_up() {
        let path = PathBuf::from("tests/assets/sample.mp4");
        if !path.exists() {
            println!("Skipping test: {:?} not found", path);
            return;
        }
        let stop = CancellationToken::new();
        stop.cancel();
        let result = extract_frame(&path, FramePosition::Last, &stop);
        assert!(matches!(result, Err(MediaError::Cancelled)));
    }
}
