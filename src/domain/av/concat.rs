use super::probe::MediaInfo;
use super::MediaError;
use ffmpeg_next as ffmpeg;
use ffmpeg::{Rational, Rescale};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const MICROS: Rational = Rational(1, 1_000_000);

/// Append the packets of `inputs`, in order, into one container at `output`
/// without re-encoding. Every input must share the first one's stream layout.
///
/// `on_input_done` is called with the number of inputs written so far.
/// `stop` is checked before every packet; once it is cancelled the output is
/// closed unfinished and `MediaError::Cancelled` is returned.
pub fn concat_stream_copy(
    inputs: &[PathBuf],
    output: &Path,
    stop: &CancellationToken,
    mut on_input_done: impl FnMut(usize),
) -> Result<(), MediaError> {
    let first = inputs
        .first()
        .ok_or_else(|| MediaError::Incompatible("no inputs".into()))?;

    ffmpeg::init()?;
    let mut octx = ffmpeg::format::output(&output)?;

    let stream_count = {
        let template = ffmpeg::format::input(first)?;
        for stream in template.streams() {
            let mut out = octx.add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))?;
            out.set_parameters(stream.parameters());
            // Let the muxer pick a tag valid for the output container.
            unsafe {
                (*out.parameters().as_mut_ptr()).codec_tag = 0;
            }
        }
        template.streams().count()
    };

    octx.write_header()?;
    let out_time_bases: Vec<Rational> = (0..stream_count)
        .map(|index| {
            octx.stream(index)
                .map(|stream| stream.time_base())
                .ok_or_else(|| MediaError::Encode(format!("output stream {} missing", index)))
        })
        .collect::<Result<_, _>>()?;

    let mut offset_us: i64 = 0;
    for (position, path) in inputs.iter().enumerate() {
        let mut ictx = ffmpeg::format::input(path)?;
        let mut base_us: Option<i64> = None;
        let mut end_us: i64 = 0;

        for (stream, mut packet) in ictx.packets() {
            if stop.is_cancelled() {
                debug!(input = %path.display(), "stream copy stopped");
                return Err(MediaError::Cancelled);
            }
            let index = stream.index();
            if index >= stream_count {
                continue;
            }
            let in_tb = stream.time_base();
            let out_tb = out_time_bases[index];

            let Some(ts) = packet.dts().or(packet.pts()) else {
                continue;
            };
            let ts_us = ts.rescale(in_tb, MICROS);
            let base = *base_us.get_or_insert(ts_us);

            if let Some(pts) = packet.pts() {
                let end = (pts + packet.duration().max(0)).rescale(in_tb, MICROS) - base;
                end_us = end_us.max(end);
            }

            let shift = (offset_us - base).rescale(MICROS, out_tb);
            packet.rescale_ts(in_tb, out_tb);
            packet.set_pts(packet.pts().map(|pts| pts + shift));
            packet.set_dts(packet.dts().map(|dts| dts + shift));
            packet.set_stream(index);
            packet.set_position(-1);
            packet.write_interleaved(&mut octx)?;
        }

        debug!(input = %path.display(), offset_us, end_us, "appended input");
        offset_us += end_us;
        on_input_done(position + 1);
    }

    octx.write_trailer()?;
    Ok(())
}

/// Arguments for an `ffmpeg` invocation that decodes every input and encodes
/// one output through the concat filter, scaling all clips to `layout`'s size.
pub fn reencode_args(inputs: &[PathBuf], output: &Path, layout: &MediaInfo, with_audio: bool) -> Vec<String> {
    let (width, height) = layout
        .video()
        .map(|video| (video.width, video.height))
        .unwrap_or((1280, 720));

    let mut args: Vec<String> = ["-y", "-hide_banner", "-nostats", "-loglevel", "error"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    for input in inputs {
        args.push("-i".into());
        args.push(input.display().to_string());
    }

    let mut filter = String::new();
    for index in 0..inputs.len() {
        filter.push_str(&format!(
            "[{i}:v:0]scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2,setsar=1[v{i}];",
            i = index,
            w = width,
            h = height
        ));
    }
    for index in 0..inputs.len() {
        filter.push_str(&format!("[v{}]", index));
        if with_audio {
            filter.push_str(&format!("[{}:a:0]", index));
        }
    }
    filter.push_str(&format!(
        "concat=n={}:v=1:a={}[outv]{}",
        inputs.len(),
        u8::from(with_audio),
        if with_audio { "[outa]" } else { "" }
    ));

    args.push("-filter_complex".into());
    args.push(filter);
    args.push("-map".into());
    args.push("[outv]".into());
    if with_audio {
        args.push("-map".into());
        args.push("[outa]".into());
    }
    args.extend(
        ["-c:v", "libx264", "-preset", "veryfast", "-crf", "18", "-pix_fmt", "yuv420p"]
            .iter()
            .map(|s| s.to_string()),
    );
    if with_audio {
        args.extend(["-c:a", "aac", "-b:a", "192k"].iter().map(|s| s.to_string()));
    }
    args.push("-movflags".into());
    args.push("+faststart".into());
    args.push(output.display().to_string());
    args
}

/// Re-encode `inputs` into `output` with the ffmpeg CLI.
///
/// The child is killed and reaped before returning `MediaError::Cancelled`
/// when `stop` fires, and is killed on drop if this future is abandoned.
pub async fn concat_reencode(
    inputs: &[PathBuf],
    output: &Path,
    layout: &MediaInfo,
    with_audio: bool,
    stop: &CancellationToken,
) -> Result<(), MediaError> {
    let args = reencode_args(inputs, output, layout, with_audio);
    let mut child = Command::new("ffmpeg")
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let mut stderr_pipe = child.stderr.take();
    let stderr_reader = tokio::spawn(async move {
        let mut captured = String::new();
        if let Some(pipe) = stderr_pipe.as_mut() {
            let _ = pipe.read_to_string(&mut captured).await;
        }
        captured
    });

    let finished = tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        status = child.wait() => Some(status?),
    };
    let Some(status) = finished else {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "could not kill ffmpeg re-encode");
        }
        stderr_reader.abort();
        debug!("ffmpeg re-encode stopped");
        return Err(MediaError::Cancelled);
    };

    let stderr = stderr_reader.await.unwrap_or_default();
    if !status.success() {
        warn!(status = ?status, "ffmpeg concat re-encode failed");
        return Err(MediaError::Encode(
            stderr.lines().last().unwrap_or("ffmpeg failed").to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::av::probe::sample_info;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_reencode_args_keep_input_order() {
        let inputs = paths(&["a.mp4", "b.mp4", "c.mp4"]);
        let args = reencode_args(&inputs, Path::new("out.mp4"), &sample_info(640, 360, false), false);

        let listed: Vec<&String> = args
            .iter()
            .zip(args.iter().skip(1))
            .filter(|(flag, _)| *flag == "-i")
            .map(|(_, value)| value)
            .collect();
        assert_eq!(listed, vec!["a.mp4", "b.mp4", "c.mp4"]);
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[test]
    fn test_reencode_filter_scales_to_layout() {
        let inputs = paths(&["a.mp4", "b.mp4"]);
        let args = reencode_args(&inputs, Path::new("out.mp4"), &sample_info(640, 360, true), true);
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];

        assert!(filter.contains("[0:v:0]scale=640:360"));
        assert!(filter.contains("[v0][0:a:0][v1][1:a:0]concat=n=2:v=1:a=1[outv][outa]"));
        assert!(args.iter().any(|a| a == "[outa]"));
    }

    #[test]
    fn test_reencode_without_audio() {
        let inputs = paths(&["a.mp4", "b.mp4"]);
        let args = reencode_args(&inputs, Path::new("o.mp4"), &sample_info(640, 360, false), false);
        let filter = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];

        assert!(filter.ends_with("[v0][v1]concat=n=2:v=1:a=0[outv]"));
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn test_stream_copy_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let result = concat_stream_copy(&[], &dir.path().join("out.mp4"), &CancellationToken::new(), |_| {});
        assert!(matches!(result, Err(MediaError::Incompatible(_))));
    }

    #[test]
    fn test_reencode_args_keep_ffmpeg_quiet() {
        let args = reencode_args(&paths(&["a.mp4"]), Path::new("o.mp4"), &sample_info(640, 360, false), false);
        let level = args.iter().position(|a| a == "-loglevel").unwrap();
        assert_eq!(args[level + 1], "error");
        assert!(args.iter().any(|a| a == "-nostats"));
    }

    #[test]
    fn test_stream_copy_stops_when_cancelled() {
        let source = PathBuf::from("tests/assets/sample.mp4");
        if !source.exists() {
            println!("Skipping test: {:?} not found", source);
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let stop = CancellationToken::new();
        stop.cancel();
        let mut done = Vec::new();

        let result = concat_stream_copy(&[source.clone(), source], &dir.path().join("out.mp4"), &stop, |n| {
            done.push(n)
        });

        assert!(matches!(result, Err(MediaError::Cancelled)));
        assert!(done.is_empty());
    }

    #[tokio::test]
    async fn test_reencode_cancelled_before_start_returns_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let stop = CancellationToken::new();
        stop.cancel();
        let result = concat_reencode(
            &paths(&["a.mp4", "b.mp4"]),
            &dir.path().join("out.mp4"),
            &sample_info(640, 360, false),
            false,
            &stop,
        )
        .await;
        // Without an ffmpeg binary the spawn itself fails.
        assert!(matches!(result, Err(MediaError::Cancelled) | Err(MediaError::Io(_))));
    }

    #[test]
    fn test_stream_copy_fixture_twice() {
        let source = PathBuf::from("tests/assets/sample.mp4");
        if !source.exists() {
            println!("Skipping test: {:?} not found", source);
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("joined.mp4");
        let mut done = Vec::new();

        concat_stream_copy(&[source.clone(), source.clone()], &output, &CancellationToken::new(), |n| {
            done.push(n)
        })
        .unwrap();

        assert_eq!(done, vec![1, 2]);
        let single = crate::domain::av::probe::probe(&source).unwrap();
        let joined = crate::domain::av::probe::probe(&output).unwrap();
        let (one, two) = (single.duration_secs.unwrap(), joined.duration_secs.unwrap());
        assert!(two > one * 1.5, "joined {} vs single {}", two, one);
    }
}
