//! Scene-timing segment computation (§4.5 step 5) and the progressive/classic word-to-event
//! mapping (§4.4).

use crate::model::{Element, SubtitleStyle};
use crate::transcriber::WordTimestamp;

/// `[start_seconds, end_seconds)` assigned to one audio element, tagged with the source URL it
/// was derived from (§3: `{start_seconds, end_seconds, audio_source}`). Callers look up "this
/// scene's segment" by matching `audio_source` against the scene's own audio element rather than
/// by position, since scenes don't all own exactly one audio element.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSegment {
    pub start: f64,
    pub end: f64,
    pub audio_source: String,
}

impl TimingSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Walks `(audio_source, duration)` pairs in order, each contributing `[t_prev, t_prev +
/// duration)` tagged with its source. The returned list is gap-free and starts at 0 (§4.5 step
/// 5, §8 invariants).
pub fn compute_segments(audios: &[(String, f64)]) -> Vec<TimingSegment> {
    let mut segments = Vec::with_capacity(audios.len());
    let mut t_prev = 0.0;
    for (audio_source, duration) in audios {
        let start = t_prev;
        let end = t_prev + duration;
        segments.push(TimingSegment {
            start,
            end,
            audio_source: audio_source.clone(),
        });
        t_prev = end;
    }
    segments
}

/// Finds the segment derived from `audio_source`, if any. Used instead of positional indexing
/// so a scene (or image overlay) can recover "its" window by the audio it actually points at.
pub fn find_segment<'a>(segments: &'a [TimingSegment], audio_source: &str) -> Option<&'a TimingSegment> {
    segments.iter().find(|s| s.audio_source == audio_source)
}

/// One on-screen subtitle event: a time window plus the text visible during it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtitleEvent {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Maps a scene's word timestamps (relative to its audio) into gap-free on-screen events,
/// per the "progressive" algorithm in §4.4. Empty/whitespace-only words are dropped first so
/// that abutment is computed only over words that will actually be emitted.
pub fn progressive_events(words: &[WordTimestamp], segment: &TimingSegment) -> Vec<SubtitleEvent> {
    let words: Vec<&WordTimestamp> = words
        .iter()
        .filter(|w| !w.text.trim().is_empty())
        .collect();

    let mut events = Vec::with_capacity(words.len());
    for (i, word) in words.iter().enumerate() {
        let on_screen_start = segment.start + word.start;
        let on_screen_end = if i + 1 < words.len() {
            segment.start + words[i + 1].start
        } else {
            segment.start + word.end
        };
        let a = on_screen_start.clamp(segment.start, segment.end);
        let b = on_screen_end.clamp(segment.start, segment.end);
        if b <= a {
            continue;
        }
        events.push(SubtitleEvent {
            start: a,
            end: b,
            text: word.text.trim().to_string(),
        });
    }
    events
}

/// The "classic" style: a single event spanning the whole segment with the concatenated text
/// (§4.4, §9 Open Question: minimal interpretation, no line-wrapping).
pub fn classic_event(words: &[WordTimestamp], segment: &TimingSegment) -> Option<SubtitleEvent> {
    let text = words
        .iter()
        .map(|w| w.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return None;
    }
    Some(SubtitleEvent {
        start: segment.start,
        end: segment.end,
        text,
    })
}

/// Dispatches on [`SubtitleStyle`] to produce the event list for one scene.
pub fn events_for_style(
    style: SubtitleStyle,
    words: &[WordTimestamp],
    segment: &TimingSegment,
) -> Vec<SubtitleEvent> {
    match style {
        SubtitleStyle::Progressive => progressive_events(words, segment),
        SubtitleStyle::Classic => classic_event(words, segment).into_iter().collect(),
    }
}

/// `true` if `elements` contains both an audio element and a subtitles element (§4.4 inputs).
pub fn scene_wants_subtitles(elements: &[Element]) -> bool {
    elements.iter().any(Element::is_audio) && elements.iter().any(Element::is_subtitles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(text: &str, start: f64, end: f64) -> WordTimestamp {
        WordTimestamp {
            text: text.to_string(),
            start,
            end,
        }
    }

    fn seg(start: f64, end: f64) -> TimingSegment {
        TimingSegment {
            start,
            end,
            audio_source: "a.mp3".to_string(),
        }
    }

    #[test]
    fn compute_segments_is_gap_free_and_starts_at_zero() {
        let segments = compute_segments(&[("a.mp3".to_string(), 4.0), ("b.mp3".to_string(), 6.0)]);
        assert_eq!(segments[0], seg(0.0, 4.0));
        assert_eq!(segments[1].start, 4.0);
        assert_eq!(segments[1].end, 10.0);
        assert_eq!(segments[0].end, segments[1].start);
    }

    #[test]
    fn compute_segments_tags_each_segment_with_its_audio_source() {
        let segments = compute_segments(&[("a.mp3".to_string(), 4.0), ("b.mp3".to_string(), 6.0)]);
        assert_eq!(find_segment(&segments, "a.mp3").unwrap().start, 0.0);
        assert_eq!(find_segment(&segments, "b.mp3").unwrap().start, 4.0);
        assert!(find_segment(&segments, "c.mp3").is_none());
    }

    #[test]
    fn compute_segments_empty_for_no_audio() {
        assert!(compute_segments(&[]).is_empty());
    }

    #[test]
    fn progressive_events_scenario_three_from_spec() {
        let segment = seg(0.0, 3.0);
        let words = vec![w("Hello", 0.0, 0.5), w("world", 0.7, 1.2)];
        let events = progressive_events(&words, &segment);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].start, 0.0);
        assert_eq!(events[0].end, 0.7);
        assert_eq!(events[0].text, "Hello");
        assert_eq!(events[1].start, 0.7);
        assert_eq!(events[1].end, 1.2);
        assert_eq!(events[1].text, "world");
        // no gap between consecutive events
        assert_eq!(events[0].end, events[1].start);
    }

    #[test]
    fn progressive_events_clamp_to_segment_bounds() {
        let segment = seg(1.0, 2.0);
        let words = vec![w("over", 0.0, 5.0)];
        let events = progressive_events(&words, &segment);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, 1.0);
        assert_eq!(events[0].end, 2.0);
    }

    #[test]
    fn progressive_events_drop_whitespace_only_words() {
        let segment = seg(0.0, 3.0);
        let words = vec![w("  ", 0.0, 0.2), w("real", 0.2, 0.5)];
        let events = progressive_events(&words, &segment);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "real");
    }

    #[test]
    fn classic_event_spans_whole_segment() {
        let segment = seg(0.0, 3.0);
        let words = vec![w("Hello", 0.0, 0.5), w("world", 0.7, 1.2)];
        let event = classic_event(&words, &segment).unwrap();
        assert_eq!(event.start, 0.0);
        assert_eq!(event.end, 3.0);
        assert_eq!(event.text, "Hello world");
    }

    #[test]
    fn classic_event_none_for_empty_words() {
        let segment = seg(0.0, 3.0);
        assert!(classic_event(&[], &segment).is_none());
    }

    #[test]
    fn scene_wants_subtitles_requires_both_audio_and_subtitles_element() {
        let audio = Element::Audio {
            src: "a.mp3".into(),
            duration: 1.0,
            volume: 1.0,
        };
        let subs = Element::Subtitles {
            settings: Default::default(),
            language: None,
        };
        assert!(scene_wants_subtitles(&[audio.clone(), subs]));
        assert!(!scene_wants_subtitles(&[audio]));
    }
}
