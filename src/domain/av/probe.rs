use super::MediaError;
use ffmpeg_next as ffmpeg;
use ffmpeg::media::Type;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Video,
    Audio,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaInfo {
    /// Demuxer name as reported by ffmpeg, e.g. `mov,mp4,m4a,3gp,3g2,mj2`.
    pub format_name: String,
    pub duration_secs: Option<f64>,
    pub streams: Vec<StreamInfo>,
}

impl MediaInfo {
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.streams.iter().any(|s| s.kind == StreamKind::Audio)
    }

    /// Whether packets from `other` can be appended to a file laid out like
    /// `self` without re-encoding.
    pub fn is_concat_compatible(&self, other: &MediaInfo) -> Result<(), String> {
        if self.streams.len() != other.streams.len() {
            return Err(format!(
                "stream count differs ({} vs {})",
                self.streams.len(),
                other.streams.len()
            ));
        }
        for (index, (a, b)) in self.streams.iter().zip(&other.streams).enumerate() {
            if a.kind != b.kind || a.codec != b.codec {
                return Err(format!(
                    "stream {} is {:?}/{} vs {:?}/{}",
                    index, a.kind, a.codec, b.kind, b.codec
                ));
            }
            if a.kind == StreamKind::Video && (a.width != b.width || a.height != b.height) {
                return Err(format!(
                    "stream {} is {}x{} vs {}x{}",
                    index, a.width, a.height, b.width, b.height
                ));
            }
            if a.kind == StreamKind::Audio && a.sample_rate != b.sample_rate {
                return Err(format!(
                    "stream {} samples at {} vs {}",
                    index, a.sample_rate, b.sample_rate
                ));
            }
        }
        Ok(())
    }
}

/// File extension for a demuxer name, falling back to `mp4`.
pub fn container_extension(format_name: &str) -> &'static str {
    let names: Vec<&str> = format_name.split(',').map(str::trim).collect();
    let has = |name: &str| names.iter().any(|n| *n == name);

    if has("mp4") || has("mov") {
        "mp4"
    } else if has("webm") {
        "webm"
    } else if has("matroska") {
        "mkv"
    } else if has("mpegts") {
        "ts"
    } else if has("avi") {
        "avi"
    } else {
        "mp4"
    }
}

pub fn probe(path: &Path) -> Result<MediaInfo, MediaError> {
    ffmpeg::init()?;
    let context = ffmpeg::format::input(&path)?;

    let duration = context.duration();
    let duration_secs = (duration > 0).then(|| duration as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE));

    let mut streams = Vec::new();
    for stream in context.streams() {
        let parameters = stream.parameters();
        let codec = format!("{:?}", parameters.id());
        let mut info = StreamInfo {
            kind: StreamKind::Other,
            codec,
            width: 0,
            height: 0,
            sample_rate: 0,
        };

        match parameters.medium() {
            Type::Video => {
                let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                    .decoder()
                    .video()?;
                info.kind = StreamKind::Video;
                info.width = decoder.width();
                info.height = decoder.height();
            }
            Type::Audio => {
                let decoder = ffmpeg::codec::context::Context::from_parameters(parameters)?
                    .decoder()
                    .audio()?;
                info.kind = StreamKind::Audio;
                info.sample_rate = decoder.rate();
            }
            _ => {}
        }
        streams.push(info);
    }

    Ok(MediaInfo {
        format_name: context.format().name().to_string(),
        duration_secs,
        streams,
    })
}

#[cfg(test)]
pub(crate) fn sample_info(width: u32, height: u32, with_audio: bool) -> MediaInfo {
    let mut streams = vec![StreamInfo {
        kind: StreamKind::Video,
        codec: "H264".into(),
        width,
        height,
        sample_rate: 0,
    }];
    if with_audio {
        streams.push(StreamInfo {
            kind: StreamKind::Audio,
            codec: "AAC".into(),
            width: 0,
            height: 0,
            sample_rate: 44100,
        });
    }
    MediaInfo {
        format_name: "mov,mp4,m4a,3gp,3g2,mj2".into(),
        duration_secs: Some(5.0),
        streams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_container_extension() {
        assert_eq!(container_extension("mov,mp4,m4a,3gp,3g2,mj2"), "mp4");
        assert_eq!(container_extension("matroska,webm"), "webm");
        assert_eq!(container_extension("matroska"), "mkv");
        assert_eq!(container_extension("mpegts"), "ts");
        assert_eq!(container_extension("something_else"), "mp4");
        assert_eq!(container_extension(""), "mp4");
    }

    #[test]
    fn test_identical_layouts_are_compatible() {
        let a = sample_info(1280, 720, true);
        assert!(a.is_concat_compatible(&sample_info(1280, 720, true)).is_ok());
    }

    #[test]
    fn test_resolution_mismatch_is_incompatible() {
        let a = sample_info(1280, 720, false);
        let err = a
            .is_concat_compatible(&sample_info(1920, 1080, false))
            .unwrap_err();
        assert!(err.contains("1280x720"));
    }

    #[test]
    fn test_stream_layout_mismatch_is_incompatible() {
        let a = sample_info(1280, 720, true);
        assert!(a.is_concat_compatible(&sample_info(1280, 720, false)).is_err());
    }

    #[test]
    fn test_codec_mismatch_is_incompatible() {
        let a = sample_info(1280, 720, false);
        let mut b = sample_info(1280, 720, false);
        b.streams[0].codec = "HEVC".into();
        assert!(a.is_concat_compatible(&b).is_err());
    }

    #[test]
    fn test_probe_fixture() {
        let path = PathBuf::from("tests/assets/sample.mp4");
        if !path.exists() {
            println!("Skipping test: {:?} not found", path);
            return;
        }
        let info = probe(&path).unwrap();
        assert!(info.video().is_some());
        assert!(info.duration_secs.unwrap_or(0.0) > 0.0);
    }
}
