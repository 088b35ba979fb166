//! Command Graph Builder (C5, §4.5): turns a validated project, probe results, and an optional
//! subtitle file into the exact argument vector passed to the encoder subprocess.
//!
//! The composition is declarative: every URL and computed value is its own argument-vector
//! entry, never interpolated into another flag or a shell string (§4.5, §9's "no shell, no
//! interpolation" framing).

pub mod filtergraph;

use crate::config::Config;
use crate::model::{Element, Project, QualityTier};
use crate::probe::ProbedMedia;
use crate::security;
use crate::subtitle::timing::{compute_segments, find_segment, TimingSegment};
use crate::error::{ClipforgeError, Result};
use filtergraph::{FilterGraph, FilterNode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const TRAILING_PAD_SECONDS: f64 = 2.0;
const IMAGE_OVERLAY_SIZE: u32 = 500;
const IMAGE_FALLBACK_WINDOW_SECONDS: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKind {
    Video,
    Audio,
    Image,
}

struct InputSlot {
    kind: InputKind,
    url: String,
    stream_loop: Option<u64>,
}

/// The finished encoder invocation for one project.
#[derive(Debug, Clone)]
pub struct BuiltCommand {
    pub args: Vec<String>,
    pub output_path: PathBuf,
    pub total_duration: f64,
}

/// A fresh, content-opaque output filename under the configured storage directory (§4.5 step 8).
pub fn output_filename() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("video_{}.mp4", &id[..8])
}

fn all_sources(project: &Project) -> Vec<&str> {
    let mut sources: Vec<&str> = project.elements.iter().filter_map(Element::src).collect();
    for scene in &project.scenes {
        sources.extend(scene.elements.iter().filter_map(Element::src));
    }
    sources
}

/// Runs §4.1 on every element source in the project. Aborts the whole build on first
/// rejection (§4.5 step 1).
fn validate_all_sources(project: &Project, allowlist: &[String]) -> Result<()> {
    for src in all_sources(project) {
        security::validate(src, allowlist).map_err(|rejection| {
            ClipforgeError::InvalidInput(format!(
                "source rejected ({}): {}",
                rejection.violation_type.as_str(),
                rejection.reason
            ))
        })?;
    }
    Ok(())
}

fn quality_crf(quality: QualityTier) -> u32 {
    match quality {
        QualityTier::High => 18,
        QualityTier::Medium | QualityTier::Low => 23,
    }
}

/// ffmpeg filter arguments treat `:` and `\` specially inside a filter's option string; the
/// subtitle file path is passed as a filter option (`ass=<path>`), not a top-level argument,
/// so it needs this narrow escaping even though it never touches a shell.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
}

/// Builds the full encoder argument vector for one project (§4.5).
///
/// `probes` must contain an entry for every source URL in the project (video/audio/image);
/// the orchestrator is responsible for probing (with fallback substitution, §4.2) before
/// calling this. `subtitle_path`, if present, is burned in as the last video filter stage.
pub fn build(
    project: &Project,
    probes: &HashMap<String, ProbedMedia>,
    subtitle_path: Option<&Path>,
    config: &Config,
    output_path: PathBuf,
) -> Result<BuiltCommand> {
    validate_all_sources(project, &config.security.domain_allowlist)?;

    let background = project
        .background_video()
        .ok_or_else(|| ClipforgeError::InvalidInput("project has no background video element".to_string()))?;
    let bg_src = background
        .src()
        .expect("a video element always carries a source url");
    let bg_probe = probes
        .get(bg_src)
        .ok_or_else(|| ClipforgeError::Internal(format!("no probe result for background video {bg_src}")))?;

    let mut audio_urls: Vec<String> = Vec::new();
    for scene in &project.scenes {
        audio_urls.extend(scene.audio_elements().filter_map(Element::src).map(str::to_string));
    }

    // Each image keeps the index of the scene it belongs to, so its overlay window can be
    // looked up from that scene's own audio source rather than from the image's flat position.
    let mut image_elements: Vec<(usize, &Element)> = Vec::new();
    for (scene_idx, scene) in project.scenes.iter().enumerate() {
        image_elements.extend(scene.image_elements().map(|e| (scene_idx, e)));
    }

    let mut audio_durations = Vec::with_capacity(audio_urls.len());
    for url in &audio_urls {
        let probe = probes
            .get(url)
            .ok_or_else(|| ClipforgeError::Internal(format!("no probe result for audio {url}")))?;
        if probe.duration_seconds <= 0.0 {
            return Err(ClipforgeError::InvalidInput(format!(
                "audio element {url} has zero duration"
            )));
        }
        audio_durations.push(probe.duration_seconds);
    }

    let total_duration: f64 = audio_durations.iter().sum::<f64>() + TRAILING_PAD_SECONDS;
    let audio_pairs: Vec<(String, f64)> = audio_urls
        .iter()
        .cloned()
        .zip(audio_durations.iter().copied())
        .collect();
    let segments = compute_segments(&audio_pairs);

    let loop_count = if bg_probe.duration_seconds > 0.0 {
        (total_duration / bg_probe.duration_seconds).ceil().max(1.0) as u64
    } else {
        1
    };

    let mut inputs: Vec<InputSlot> = Vec::with_capacity(1 + audio_urls.len() + image_elements.len());
    inputs.push(InputSlot {
        kind: InputKind::Video,
        url: bg_src.to_string(),
        stream_loop: Some(loop_count),
    });
    for url in &audio_urls {
        inputs.push(InputSlot {
            kind: InputKind::Audio,
            url: url.clone(),
            stream_loop: None,
        });
    }
    for (_, element) in &image_elements {
        inputs.push(InputSlot {
            kind: InputKind::Image,
            url: element.src().unwrap_or_default().to_string(),
            stream_loop: None,
        });
    }

    let bg_index = 0usize;
    let audio_base = 1usize;
    let image_base = audio_base + audio_urls.len();

    let mut graph = FilterGraph::default();
    let has_audio = !audio_urls.is_empty();
    if audio_urls.len() >= 2 {
        let concat_inputs: Vec<String> = (0..audio_urls.len())
            .map(|i| format!("{}:a", audio_base + i))
            .collect();
        graph.push(FilterNode::new(
            concat_inputs,
            format!("concat=n={}:v=0:a=1", audio_urls.len()),
            vec!["concatenated_audio".to_string()],
        ));
        graph.push(FilterNode::new(
            vec!["concatenated_audio".to_string()],
            format!("apad=pad_dur={TRAILING_PAD_SECONDS}"),
            vec!["final_audio".to_string()],
        ));
    } else if audio_urls.len() == 1 {
        graph.push(FilterNode::new(
            vec![format!("{audio_base}:a")],
            format!("apad=pad_dur={TRAILING_PAD_SECONDS}"),
            vec!["final_audio".to_string()],
        ));
    }

    let mut video_label = format!("{bg_index}:v");
    for (i, (scene_idx, element)) in image_elements.iter().enumerate() {
        let (x, y) = match element {
            Element::Image { x, y, .. } => (*x, *y),
            _ => (0, 0),
        };
        // The image's own window is its parent scene's audio segment, found by source rather
        // than by the image's flat position (§3, §4.5). Scenes with no audio of their own (or
        // whose audio source has no matching segment) fall back to a simple i*5..(i+1)*5 slot.
        let fallback = TimingSegment {
            start: i as f64 * IMAGE_FALLBACK_WINDOW_SECONDS,
            end: (i as f64 + 1.0) * IMAGE_FALLBACK_WINDOW_SECONDS,
            audio_source: String::new(),
        };
        let window: TimingSegment = project.scenes[*scene_idx]
            .audio_elements()
            .find_map(Element::src)
            .and_then(|src| find_segment(&segments, src))
            .cloned()
            .unwrap_or(fallback);
        let img_index = image_base + i;
        let scaled_label = format!("scaled_img_{i}");
        graph.push(FilterNode::new(
            vec![format!("{img_index}:v")],
            format!("scale={IMAGE_OVERLAY_SIZE}:{IMAGE_OVERLAY_SIZE}"),
            vec![scaled_label.clone()],
        ));
        let overlay_label = format!("overlay_{i}");
        graph.push(FilterNode::new(
            vec![video_label.clone(), scaled_label],
            format!(
                "overlay={x}:{y}:enable='between(t,{:.2},{:.2})'",
                window.start, window.end
            ),
            vec![overlay_label.clone()],
        ));
        video_label = overlay_label;
    }

    if let Some(path) = subtitle_path {
        graph.push(FilterNode::new(
            vec![video_label.clone()],
            format!("ass={}", escape_filter_path(path)),
            vec!["subtitled_video".to_string()],
        ));
        video_label = "subtitled_video".to_string();
    }

    let mut args: Vec<String> = vec![
        "-y".to_string(),
        "-protocol_whitelist".to_string(),
        "file,http,https,tcp,tls".to_string(),
    ];

    for slot in &inputs {
        if let Some(loop_count) = slot.stream_loop {
            args.push("-stream_loop".to_string());
            args.push(loop_count.to_string());
        }
        let _ = slot.kind; // kept on the struct for readability at call sites / future use
        args.push("-i".to_string());
        args.push(slot.url.clone());
    }

    if !graph.is_empty() {
        args.push("-filter_complex".to_string());
        args.push(graph.render());
    }

    args.push("-map".to_string());
    args.push(if video_label.contains(':') {
        video_label.clone()
    } else {
        format!("[{video_label}]")
    });

    if has_audio {
        args.push("-map".to_string());
        args.push("[final_audio]".to_string());
    }

    args.push("-t".to_string());
    args.push(format!("{total_duration:.2}"));
    args.push("-c:v".to_string());
    args.push("libx264".to_string());
    args.push("-c:a".to_string());
    args.push("aac".to_string());
    args.push("-crf".to_string());
    args.push(quality_crf(project.quality).to_string());
    args.push("-preset".to_string());
    args.push(config.encoder.preset.clone());
    if let Some((w, h)) = project.resolved_dimensions()? {
        args.push("-s".to_string());
        args.push(format!("{w}x{h}"));
    }
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push("-pix_fmt".to_string());
    args.push("yuv420p".to_string());
    args.push(output_path.to_string_lossy().into_owned());

    Ok(BuiltCommand {
        args,
        output_path,
        total_duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Element, Scene};

    fn media(duration: f64) -> ProbedMedia {
        ProbedMedia {
            duration_seconds: duration,
            format: "mov,mp4".to_string(),
            width: Some(1920),
            height: Some(1080),
            codec: Some("h264".to_string()),
            bitrate: None,
        }
    }

    fn project_with(scenes: Vec<Scene>, background: &str) -> Project {
        Project {
            width: None,
            height: None,
            resolution: None,
            quality: QualityTier::Medium,
            scenes,
            elements: vec![Element::Video {
                src: background.to_string(),
                x: 0,
                y: 0,
                z_index: 0,
                duration: 0.0,
                volume: 1.0,
                resize_mode: Default::default(),
            }],
        }
    }

    fn audio(src: &str, duration: f64) -> Element {
        Element::Audio {
            src: src.to_string(),
            duration,
            volume: 1.0,
        }
    }

    fn arg_str(args: &[String]) -> String {
        args.join(" ")
    }

    #[test]
    fn scenario_1_single_scene_single_audio_no_images() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("a.mp3", 7.0)],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a.mp3".to_string(), media(7.0));

        let config = Config::default();
        let built = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);

        assert!(rendered.contains("-stream_loop 1 -i bg.mp4"));
        assert!(rendered.contains("-i a.mp3"));
        assert!(rendered.contains("[1:a]apad=pad_dur=2[final_audio]"));
        assert!(rendered.contains("-map 0:v"));
        assert!(rendered.contains("-map [final_audio]"));
        assert!(rendered.contains("-t 9.00"));
    }

    #[test]
    fn scenario_2_two_scenes_two_audios_one_image_overlay() {
        let scenes = vec![
            Scene {
                id: "s1".to_string(),
                background_color: None,
                elements: vec![audio("a1.mp3", 4.0)],
            },
            Scene {
                id: "s2".to_string(),
                background_color: None,
                elements: vec![
                    audio("a2.mp3", 6.0),
                    Element::Image {
                        src: "logo.png".to_string(),
                        x: 100,
                        y: 50,
                        z_index: 0,
                        duration: 0.0,
                        resize_mode: Default::default(),
                    },
                ],
            },
        ];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a1.mp3".to_string(), media(4.0));
        probes.insert("a2.mp3".to_string(), media(6.0));
        probes.insert("logo.png".to_string(), media(0.0));

        let config = Config::default();
        let built = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);

        assert!(rendered.contains("overlay=100:50:enable='between(t,4.00,10.00)'"));
        assert!(rendered.contains("-t 12.00"));
    }

    #[test]
    fn image_in_scene_without_audio_falls_back_to_positional_window() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![Element::Image {
                src: "logo.png".to_string(),
                x: 10,
                y: 20,
                z_index: 0,
                duration: 0.0,
                resize_mode: Default::default(),
            }],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("logo.png".to_string(), media(0.0));

        let config = Config::default();
        let built = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);

        assert!(rendered.contains("overlay=10:20:enable='between(t,0.00,5.00)'"));
    }

    #[test]
    fn named_resolution_resolves_to_dimensions_flag() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("a.mp3", 3.0)],
        }];
        let mut project = project_with(scenes, "bg.mp4");
        project.resolution = Some("720p".to_string());
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a.mp3".to_string(), media(3.0));

        let config = Config::default();
        let built = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);

        assert!(rendered.contains("-s 1280x720"));
    }

    #[test]
    fn unknown_named_resolution_is_rejected() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("a.mp3", 3.0)],
        }];
        let mut project = project_with(scenes, "bg.mp4");
        project.resolution = Some("potato-vision".to_string());
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a.mp3".to_string(), media(3.0));

        let config = Config::default();
        let err = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[test]
    fn zero_audio_omits_audio_mapping() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));

        let config = Config::default();
        let built = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);

        assert!(!rendered.contains("[final_audio]"));
        assert!(rendered.contains("-t 2.00"));
    }

    #[test]
    fn missing_background_video_is_fatal() {
        let project = Project {
            width: None,
            height: None,
            resolution: None,
            quality: QualityTier::Medium,
            scenes: vec![],
            elements: vec![],
        };
        let probes = HashMap::new();
        let config = Config::default();
        let err = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[test]
    fn zero_duration_audio_is_rejected() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("a.mp3", 0.0)],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a.mp3".to_string(), media(0.0));

        let config = Config::default();
        let err = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[test]
    fn malicious_source_is_rejected_before_any_ffmpeg_args_are_built() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("javascript:alert(1)", 5.0)],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));

        let config = Config::default();
        let err = build(&project, &probes, None, &config, PathBuf::from("out.mp4")).unwrap_err();
        assert_eq!(err.code(), "invalid-input");
    }

    #[test]
    fn subtitle_file_appends_burn_in_filter_and_becomes_final_video_label() {
        let scenes = vec![Scene {
            id: "s1".to_string(),
            background_color: None,
            elements: vec![audio("a.mp3", 5.0)],
        }];
        let project = project_with(scenes, "bg.mp4");
        let mut probes = HashMap::new();
        probes.insert("bg.mp4".to_string(), media(10.0));
        probes.insert("a.mp3".to_string(), media(5.0));

        let config = Config::default();
        let subtitle_path = PathBuf::from("/tmp/subs.ass");
        let built = build(&project, &probes, Some(&subtitle_path), &config, PathBuf::from("out.mp4")).unwrap();
        let rendered = arg_str(&built.args);
        assert!(rendered.contains("ass=/tmp/subs.ass[subtitled_video]"));
        assert!(rendered.contains("-map [subtitled_video]"));
    }

    #[test]
    fn output_filename_has_video_prefix_and_mp4_extension() {
        let name = output_filename();
        assert!(name.starts_with("video_"));
        assert!(name.ends_with(".mp4"));
    }
}
