//! Subtitle Timing & Format Engine (C4, §4.4).

pub mod ass;
pub mod timing;

use crate::error::Result;
use crate::model::{Element, Scene, SubtitleSettings};
use crate::transcriber::WordTimestamp;
use timing::{events_for_style, find_segment, TimingSegment};

pub use timing::{SubtitleEvent, compute_segments, scene_wants_subtitles};

/// Builds one project's burn-in subtitle document by concatenating the events of every scene
/// that opted into subtitles, in scene order (§4.4, §9 Open Question: one document per
/// project).
///
/// `scene_words` supplies, for each scene (by index into `scenes`), the word-level transcript
/// of that scene's audio — `None` when the scene has no audio or transcription was skipped.
///
/// Each scene's window is recovered by matching its own audio element's source against
/// `segments`' `audio_source` tag, not by zipping scenes against segments positionally — a
/// scene without audio, or a project whose scenes don't each own exactly one audio element,
/// would otherwise pull the wrong window.
pub fn build_project_document(
    scenes: &[Scene],
    segments: &[TimingSegment],
    scene_words: &[Option<Vec<WordTimestamp>>],
) -> Result<Option<String>> {
    let mut settings: Option<&SubtitleSettings> = None;
    let mut all_events: Vec<SubtitleEvent> = Vec::new();

    for (idx, scene) in scenes.iter().enumerate() {
        let Some(Element::Subtitles {
            settings: scene_settings,
            ..
        }) = scene.subtitle_element()
        else {
            continue;
        };

        let Some(segment) = scene
            .audio_elements()
            .find_map(Element::src)
            .and_then(|src| find_segment(segments, src))
        else {
            continue;
        };

        settings = Some(scene_settings);

        let words: &[WordTimestamp] = scene_words
            .get(idx)
            .and_then(|w| w.as_deref())
            .unwrap_or(&[]);

        all_events.extend(events_for_style(scene_settings.style, words, segment));
    }

    match settings {
        Some(settings) => Ok(Some(ass::write_document(settings, &all_events)?)),
        None => Ok(None),
    }
}
