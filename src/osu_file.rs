//! Metadata-only parser for `.osu` chart files.
//!
//! This is the fallback path used when no usable map database exists: each
//! songs-folder subdirectory is turned into a set by parsing the metadata
//! sections of every chart inside. Gameplay data (hit object geometry,
//! hitsounds) is intentionally not parsed here.

use std::fmt;
use std::fs;
use std::path::Path;

use md5::{Digest, Md5};
use regex::Regex;

use crate::beatmap::{Difficulty, Origin};
use crate::hash::ContentHash;
use crate::timing::{compute_bpm, TimingEntry};

lazy_static! {
    static ref SECTION_HEADER_RGX: Regex =
        Regex::new(r"^\[(?P<name>[A-Za-z]+)\]").expect("compile");
    static ref KEY_VALUE_RGX: Regex =
        Regex::new(r"^(?P<key>[A-Za-z0-9]+)\s*:\s*(?P<value>.*)$").expect("compile");
    static ref BACKGROUND_EVENT_RGX: Regex =
        Regex::new(r#"^0\s*,\s*0\s*,\s*"(?P<filename>[^"]+)""#).expect("compile");
}

/// Errors that can occur while parsing a chart file
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ParseError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("error parsing int: {0}")]
    Int(#[from] std::num::ParseIntError),

    #[error("error parsing float: {0}")]
    Float(#[from] std::num::ParseFloatError),

    #[error("not an osu!standard chart (mode {0})")]
    NotStandardMode(u8),

    #[error("no hit objects")]
    Empty,
}

/// A parse error together with the line it occurred on.
#[derive(Debug)]
pub struct ChartParseError {
    /// 1-based line number where the error occurred.
    pub line: usize,
    /// The kind of error that occurred.
    pub inner: ParseError,
}

impl fmt::Display for ChartParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "error on line {}: {}", self.line, self.inner)
    }
}

impl std::error::Error for ChartParseError {}

macro_rules! fail {
    ($line:expr, $err:expr) => {
        ChartParseError {
            line: $line,
            inner: $err.into(),
        }
    };
}

/// Parse a single chart file into a [`Difficulty`], hashing the file's
/// bytes for the content hash on the way.
///
/// `folder` is the owning directory (with trailing separator), which the
/// returned difficulty records alongside its own filename.
pub fn parse_metadata(
    path: &Path,
    folder: &str,
    origin: Origin,
) -> Result<Difficulty, ChartParseError> {
    let bytes = fs::read(path).map_err(|err| fail!(0, err))?;

    let mut hasher = Md5::new();
    hasher.update(&bytes);
    let hash = ContentHash(hasher.finalize().into());

    let content = String::from_utf8_lossy(&bytes);

    let mut diff = Difficulty {
        hash,
        folder: folder.to_owned(),
        osu_filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        origin,
        ..Difficulty::default()
    };

    let mut mode = 0_u8;
    let mut timing = Vec::new();
    let mut num_objects = 0_u32;
    let mut last_object_ms = 0_f64;

    let mut section = String::from("Preamble");
    for (i, raw_line) in content.lines().enumerate() {
        let line_no = i + 1;
        let line = raw_line.trim_end_matches('\r').trim();

        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        if let Some(captures) = SECTION_HEADER_RGX.captures(line) {
            section = String::from(&captures["name"]);
            continue;
        }

        match section.as_str() {
            "General" | "Metadata" | "Difficulty" => {
                let captures = match KEY_VALUE_RGX.captures(line) {
                    Some(captures) => captures,
                    None => continue,
                };
                let value = captures["value"].trim();
                match &captures["key"] {
                    "AudioFilename" => diff.audio_filename = value.to_owned(),
                    "PreviewTime" => {
                        let preview: i64 = value.parse::<i64>().map_err(|e| fail!(line_no, e))?;
                        diff.preview_ms = preview.max(0) as u32;
                    }
                    "StackLeniency" => {
                        diff.stack_leniency = value.parse::<f32>().map_err(|e| fail!(line_no, e))?
                    }
                    "Mode" => mode = value.parse::<u8>().map_err(|e| fail!(line_no, e))?,
                    "Title" => diff.title = value.to_owned(),
                    "TitleUnicode" => diff.title_unicode = value.to_owned(),
                    "Artist" => diff.artist = value.to_owned(),
                    "ArtistUnicode" => diff.artist_unicode = value.to_owned(),
                    "Creator" => diff.creator = value.to_owned(),
                    "Version" => diff.diff_name = value.to_owned(),
                    "Source" => diff.source = value.to_owned(),
                    "Tags" => diff.tags = value.to_owned(),
                    "BeatmapID" => diff.map_id = value.parse::<i32>().map_err(|e| fail!(line_no, e))?,
                    "BeatmapSetID" => {
                        diff.set_id = value.parse::<i32>().map_err(|e| fail!(line_no, e))?
                    }
                    "HPDrainRate" => diff.hp = value.parse::<f32>().map_err(|e| fail!(line_no, e))?,
                    "CircleSize" => diff.cs = value.parse::<f32>().map_err(|e| fail!(line_no, e))?,
                    "OverallDifficulty" => {
                        diff.od = value.parse::<f32>().map_err(|e| fail!(line_no, e))?
                    }
                    "ApproachRate" => diff.ar = value.parse::<f32>().map_err(|e| fail!(line_no, e))?,
                    "SliderMultiplier" => {
                        diff.slider_multiplier = value.parse::<f64>().map_err(|e| fail!(line_no, e))?
                    }
                    _ => {}
                }
            }
            "Events" => {
                if diff.background_filename.is_empty() {
                    if let Some(captures) = BACKGROUND_EVENT_RGX.captures(line) {
                        diff.background_filename = String::from(&captures["filename"]);
                    }
                }
            }
            "TimingPoints" => {
                let mut fields = line.split(',');
                let offset: f64 = match fields.next().map(|f| f.trim().parse()) {
                    Some(Ok(v)) => v,
                    _ => continue,
                };
                let ms_per_beat: f64 = match fields.next().map(|f| f.trim().parse()) {
                    Some(Ok(v)) => v,
                    _ => continue,
                };
                // field 7 ("uninherited") is absent in very old charts,
                // where every point sets a tempo
                let uninherited = fields
                    .nth(4)
                    .map(|f| f.trim() != "0")
                    .unwrap_or(true);
                timing.push(TimingEntry {
                    ms_per_beat,
                    offset_ms: offset,
                    uninherited,
                });
            }
            "HitObjects" => {
                let mut fields = line.split(',');
                let kind: u32 = match fields.nth(3).map(|f| f.trim().parse()) {
                    Some(Ok(v)) => v,
                    _ => continue,
                };
                if kind & 1 != 0 {
                    diff.num_circles = diff.num_circles.saturating_add(1);
                } else if kind & 2 != 0 {
                    diff.num_sliders = diff.num_sliders.saturating_add(1);
                } else if kind & 8 != 0 {
                    diff.num_spinners = diff.num_spinners.saturating_add(1);
                }
                num_objects += 1;

                if let Some(Ok(time)) = line.split(',').nth(2).map(|f| f.trim().parse::<f64>()) {
                    last_object_ms = last_object_ms.max(time);
                }
            }
            _ => {}
        }
    }

    if mode != 0 {
        return Err(fail!(0, ParseError::NotStandardMode(mode)));
    }
    if num_objects == 0 {
        return Err(fail!(0, ParseError::Empty));
    }

    if diff.title_unicode.trim().is_empty() {
        diff.title_unicode = diff.title.clone();
    }
    if diff.artist_unicode.trim().is_empty() {
        diff.artist_unicode = diff.artist.clone();
    }

    diff.length_ms = last_object_ms.max(0.0) as i32;
    let bpm = compute_bpm(&timing, last_object_ms);
    diff.min_bpm = bpm.min;
    diff.max_bpm = bpm.max;
    diff.avg_bpm = bpm.most_common;

    if let Ok(meta) = fs::metadata(path) {
        if let Ok(modified) = meta.modified() {
            if let Ok(elapsed) = modified.duration_since(std::time::UNIX_EPOCH) {
                diff.last_modification = elapsed.as_secs() as i64;
            }
        }
    }

    Ok(diff)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::beatmap::Origin;

    use super::parse_metadata;

    const SAMPLE: &str = r#"osu file format v14

[General]
AudioFilename: audio.mp3
PreviewTime: 38500
Mode: 0
StackLeniency: 0.7

[Metadata]
Title:TRICK or TREAT
TitleUnicode:TRICK or TREAT
Artist:Drop
ArtistUnicode:Drop
Creator:SUKIJames
Version:FUTSUU
Source:
Tags:halloween instrumental
BeatmapID:1989137
BeatmapSetID:952626

[Difficulty]
HPDrainRate:8.5
CircleSize:3
OverallDifficulty:4
ApproachRate:10
SliderMultiplier:1.4
SliderTickRate:1

[Events]
//Background and Video events
0,0,"bg.jpg",0,0

[TimingPoints]
147,566.037735849057,4,1,0,60,1,0
9203,-71.4285714285714,4,1,0,60,0,0

[HitObjects]
256,192,147,1,0,0:0:0:0:
256,192,713,1,0,0:0:0:0:
100,100,1279,2,0,P|200:200|300:100,1,140
256,192,34109,12,0,35000,0:0:0:0:
"#;

    #[test]
    fn test_parse_sample() {
        let dir = tempfile::tempdir().unwrap();
        let folder = format!("{}/", dir.path().display());
        let path = dir.path().join("sample.osu");
        write!(std::fs::File::create(&path).unwrap(), "{}", SAMPLE).unwrap();

        let diff = parse_metadata(&path, &folder, Origin::Legacy).unwrap();
        assert_eq!(diff.title, "TRICK or TREAT");
        assert_eq!(diff.artist, "Drop");
        assert_eq!(diff.creator, "SUKIJames");
        assert_eq!(diff.diff_name, "FUTSUU");
        assert_eq!(diff.map_id, 1989137);
        assert_eq!(diff.set_id, 952626);
        assert_eq!(diff.ar, 10.0);
        assert_eq!(diff.cs, 3.0);
        assert_eq!(diff.hp, 8.5);
        assert_eq!(diff.od, 4.0);
        assert_eq!(diff.num_circles, 2);
        assert_eq!(diff.num_sliders, 1);
        assert_eq!(diff.num_spinners, 1);
        assert_eq!(diff.background_filename, "bg.jpg");
        assert_eq!(diff.preview_ms, 38500);
        assert_eq!(diff.min_bpm, 106);
        assert_eq!(diff.max_bpm, 106);
        assert!(!diff.hash.is_suspicious());
        assert_eq!(diff.length_ms, 34109);
        assert_eq!(diff.origin, Origin::Legacy);
    }

    #[test]
    fn test_rejects_other_modes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mania.osu");
        let content = SAMPLE.replace("Mode: 0", "Mode: 3");
        write!(std::fs::File::create(&path).unwrap(), "{}", content).unwrap();

        assert!(parse_metadata(&path, "x/", Origin::Legacy).is_err());
    }
}
