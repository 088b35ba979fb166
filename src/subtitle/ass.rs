//! Burn-in subtitle document writer (§4.4, §6): ASS v4+ with one `Default` style line and one
//! `Dialogue:` line per event.

use super::timing::SubtitleEvent;
use crate::error::{ClipforgeError, Result};
use crate::model::SubtitleSettings;
use regex::Regex;
use std::sync::OnceLock;

fn color_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").unwrap())
}

/// Validates subtitle settings before render (§4.4); violations fail the job.
pub fn validate_settings(settings: &SubtitleSettings) -> Result<()> {
    if !(6..=300).contains(&settings.font_size) {
        return Err(ClipforgeError::InvalidInput(format!(
            "font_size {} out of range [6,300]",
            settings.font_size
        )));
    }
    if !(0..=20).contains(&settings.shadow_offset) {
        return Err(ClipforgeError::InvalidInput(format!(
            "shadow_offset {} out of range [0,20]",
            settings.shadow_offset
        )));
    }
    if !(0..=20).contains(&settings.outline_width) {
        return Err(ClipforgeError::InvalidInput(format!(
            "outline_width {} out of range [0,20]",
            settings.outline_width
        )));
    }
    for (name, color) in [
        ("word_color", &settings.word_color),
        ("line_color", &settings.line_color),
        ("shadow_color", &settings.shadow_color),
        ("outline_color", &settings.outline_color),
        ("box_color", &settings.box_color),
    ] {
        if !color_re().is_match(color) {
            return Err(ClipforgeError::InvalidInput(format!(
                "{name} '{color}' is not a #RRGGBB color"
            )));
        }
    }
    Ok(())
}

/// `#RRGGBB` -> ASS `&H00BBGGRR`.
pub fn color_to_ass(rgb: &str) -> Result<String> {
    if !color_re().is_match(rgb) {
        return Err(ClipforgeError::InvalidInput(format!(
            "'{rgb}' is not a #RRGGBB color"
        )));
    }
    let r = &rgb[1..3];
    let g = &rgb[3..5];
    let b = &rgb[5..7];
    Ok(format!("&H00{b}{g}{r}").to_uppercase())
}

/// ASS `&H00BBGGRR` -> `#RRGGBB` (inverse of [`color_to_ass`], used for round-trip tests).
pub fn ass_to_color(ass: &str) -> Result<String> {
    let hex = ass
        .strip_prefix("&H00")
        .or_else(|| ass.strip_prefix("&h00"))
        .ok_or_else(|| ClipforgeError::InvalidInput(format!("'{ass}' is not &H00BBGGRR")))?;
    if hex.len() != 6 {
        return Err(ClipforgeError::InvalidInput(format!(
            "'{ass}' has unexpected length"
        )));
    }
    let b = &hex[0..2];
    let g = &hex[2..4];
    let r = &hex[4..6];
    Ok(format!("#{r}{g}{b}").to_uppercase())
}

/// Seconds -> `H:MM:SS.CC` (centiseconds, ASS's native timestamp form).
pub fn format_timestamp(seconds: f64) -> String {
    let total_centis = (seconds * 100.0).round() as i64;
    let total_centis = total_centis.max(0);
    let cs = total_centis % 100;
    let total_secs = total_centis / 100;
    let s = total_secs % 60;
    let total_mins = total_secs / 60;
    let m = total_mins % 60;
    let h = total_mins / 60;
    format!("{h}:{m:02}:{s:02}.{cs:02}")
}

/// `H:MM:SS.CC` -> seconds. Inverse of [`format_timestamp`].
pub fn parse_timestamp(input: &str) -> Result<f64> {
    let (h, rest) = input
        .split_once(':')
        .ok_or_else(|| ClipforgeError::InvalidInput(format!("'{input}' missing hour field")))?;
    let (m, rest) = rest
        .split_once(':')
        .ok_or_else(|| ClipforgeError::InvalidInput(format!("'{input}' missing minute field")))?;
    let (s, cs) = rest
        .split_once('.')
        .ok_or_else(|| ClipforgeError::InvalidInput(format!("'{input}' missing centisecond field")))?;

    let parse_u = |field: &str| -> Result<f64> {
        field
            .parse::<f64>()
            .map_err(|_| ClipforgeError::InvalidInput(format!("'{input}' has a non-numeric field")))
    };
    let h: f64 = parse_u(h)?;
    let m: f64 = parse_u(m)?;
    let s: f64 = parse_u(s)?;
    let cs: f64 = parse_u(cs)?;
    Ok(h * 3600.0 + m * 60.0 + s + cs / 100.0)
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").unwrap())
}

/// Escapes dialogue text per §4.4: newlines to `\N`, `{`/`}` to `\{`/`\}`, `|` to `\h`,
/// consecutive whitespace collapsed.
///
/// Walks the collapsed text char-by-char rather than chaining four `str::replace` calls: a
/// naive `replace('{', "\\{")` reintroduces a literal `{` that a second pass would escape
/// again, breaking the idempotence required by §8. Recognizing an existing `\N`/`\{`/`\}`/`\h`
/// pair and passing it through unescaped keeps `escape_text(escape_text(s)) == escape_text(s)`.
pub fn escape_text(text: &str) -> String {
    let collapsed = whitespace_re().replace_all(text, " ");
    let mut out = String::with_capacity(collapsed.len());
    let mut chars = collapsed.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if matches!(next, 'N' | '{' | '}' | 'h') {
                    out.push('\\');
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
            out.push('\\');
            continue;
        }
        match c {
            '\n' => out.push_str("\\N"),
            '{' => out.push_str("\\{"),
            '}' => out.push_str("\\}"),
            '|' => out.push_str("\\h"),
            _ => out.push(c),
        }
    }
    out
}

const PLAY_RES_X: u32 = 1920;
const PLAY_RES_Y: u32 = 1080;

/// Writes one project's subtitle document: a `[Script Info]` header, one `Default` style
/// under `[V4+ Styles]`, and one `Dialogue:` line per event under `[Events]` (§6). Events from
/// every scene in the project are concatenated into a single document (§9 Open Question).
pub fn write_document(settings: &SubtitleSettings, events: &[SubtitleEvent]) -> Result<String> {
    validate_settings(settings)?;

    let primary = color_to_ass(&settings.word_color)?;
    let secondary = color_to_ass(&settings.line_color)?;
    let outline = color_to_ass(&settings.outline_color)?;
    let back = color_to_ass(&settings.box_color)?;
    let alignment = settings.position_alignment();

    let mut out = String::new();
    out.push_str("[Script Info]\n");
    out.push_str("Title: clipforge burn-in subtitles\n");
    out.push_str("ScriptType: v4.00+\n");
    out.push_str(&format!("PlayResX: {PLAY_RES_X}\n"));
    out.push_str(&format!("PlayResY: {PLAY_RES_Y}\n"));
    out.push_str("WrapStyle: 2\n");
    out.push_str("ScaledBorderAndShadow: yes\n");
    out.push('\n');

    out.push_str("[V4+ Styles]\n");
    out.push_str(
        "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
         BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
         BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
    );
    out.push_str(&format!(
        "Style: Default,{},{},{},{},{},{},0,0,0,0,100,100,0,0,1,{},{},{},10,10,10,1\n",
        settings.font_family,
        settings.font_size,
        primary,
        secondary,
        outline,
        back,
        settings.outline_width,
        settings.shadow_offset,
        alignment,
    ));
    out.push('\n');

    out.push_str("[Events]\n");
    out.push_str("Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n");
    for event in events {
        out.push_str(&format!(
            "Dialogue: 0,{},{},Default,,0,0,0,,{}\n",
            format_timestamp(event.start),
            format_timestamp(event.end),
            escape_text(&event.text),
        ));
    }

    Ok(out)
}

impl SubtitleSettings {
    fn position_alignment(&self) -> u8 {
        self.position.alignment_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_round_trips() {
        for rgb in ["#FFFFFF", "#000000", "#1A2B3C", "#ABCDEF"] {
            let ass = color_to_ass(rgb).unwrap();
            let back = ass_to_color(&ass).unwrap();
            assert_eq!(back, rgb.to_uppercase());
        }
    }

    #[test]
    fn color_to_ass_reorders_to_bgr() {
        // #RRGGBB = #112233 -> &H00332211
        assert_eq!(color_to_ass("#112233").unwrap(), "&H00332211");
    }

    #[test]
    fn timestamp_round_trips() {
        for &secs in &[0.0, 1.5, 59.99, 3661.23, 7199.0] {
            let formatted = format_timestamp(secs);
            let parsed = parse_timestamp(&formatted).unwrap();
            assert!((parsed - secs).abs() < 0.011, "{secs} -> {formatted} -> {parsed}");
        }
    }

    #[test]
    fn format_timestamp_matches_spec_example() {
        assert_eq!(format_timestamp(0.70), "0:00:00.70");
        assert_eq!(format_timestamp(1.20), "0:00:01.20");
    }

    #[test]
    fn format_parse_is_literal_identity_for_well_formed_input() {
        let input = "1:02:03.45";
        let parsed = parse_timestamp(input).unwrap();
        assert_eq!(format_timestamp(parsed), input);
    }

    #[test]
    fn escape_text_handles_newlines_braces_and_pipe() {
        assert_eq!(escape_text("a\nb"), "a\\Nb");
        assert_eq!(escape_text("{x}"), "\\{x\\}");
        assert_eq!(escape_text("a|b"), "a\\hb");
    }

    #[test]
    fn escape_text_collapses_consecutive_whitespace() {
        assert_eq!(escape_text("a    b\t\tc"), "a b c");
    }

    #[test]
    fn escape_text_is_idempotent() {
        let text = "hi {there} | friend\nnew line";
        let once = escape_text(text);
        let twice = escape_text(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn validate_settings_rejects_out_of_range_font_size() {
        let mut settings = SubtitleSettings::default();
        settings.font_size = 500;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn validate_settings_rejects_malformed_color() {
        let mut settings = SubtitleSettings::default();
        settings.word_color = "red".to_string();
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn write_document_contains_header_style_and_dialogue_lines() {
        let settings = SubtitleSettings::default();
        let events = vec![
            SubtitleEvent {
                start: 0.0,
                end: 0.7,
                text: "Hello".to_string(),
            },
            SubtitleEvent {
                start: 0.7,
                end: 1.2,
                text: "world".to_string(),
            },
        ];
        let doc = write_document(&settings, &events).unwrap();
        assert!(doc.contains("[Script Info]"));
        assert!(doc.contains("[V4+ Styles]"));
        assert!(doc.contains("Style: Default,"));
        assert!(doc.contains("[Events]"));
        assert!(doc.contains("Dialogue: 0,0:00:00.00,0:00:00.70,Default,,0,0,0,,Hello"));
        assert!(doc.contains("Dialogue: 0,0:00:00.70,0:00:01.20,Default,,0,0,0,,world"));
    }

    #[test]
    fn write_document_rejects_invalid_settings() {
        let mut settings = SubtitleSettings::default();
        settings.outline_width = 999;
        assert!(write_document(&settings, &[]).is_err());
    }
}
