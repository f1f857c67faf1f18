#![allow(non_upper_case_globals)] // for the bitflags constants

use crate::db::binary::{Reader, Writer};

bitflags! {
    /// The engine's own mod bitset.
    ///
    /// The low half mirrors the classic third-party flag word bit-for-bit
    /// where a mod exists in both worlds. The high half carries the
    /// "experimental" mods that only exist in this client; their bit values
    /// are part of the native score file format, so they must not be
    /// reordered.
    #[derive(Default)]
    pub struct ModFlags: u64 {
        /// No-Fail: the player cannot fail.
        const NoFail = 1 << 0;
        /// Easy: halved difficulty settings.
        const Easy = 1 << 1;
        /// Marker for scores set on a touchscreen device.
        const TouchDevice = 1 << 2;
        /// Hidden: approach circles removed, objects fade out.
        const Hidden = 1 << 3;
        /// Hard Rock: increased difficulty settings.
        const HardRock = 1 << 4;
        /// Sudden Death: fail on the first miss.
        const SuddenDeath = 1 << 5;
        /// Relax: no tapping required.
        const Relax = 1 << 7;
        /// Nightcore: pitch shift marker (the actual rate lives in `Mods::speed`).
        const Nightcore = 1 << 9;
        /// Flashlight: restricted visible area.
        const Flashlight = 1 << 10;
        /// Autoplay: the game plays itself.
        const Autoplay = 1 << 11;
        /// SpunOut: spinners complete themselves.
        const SpunOut = 1 << 12;
        /// Autopilot: cursor movement is automated.
        const Autopilot = 1 << 13;
        /// Perfect: fail on anything below a 300.
        const Perfect = 1 << 14;
        /// Target practice marker (changes the score record layout on import).
        const Target = 1 << 23;
        /// ScoreV2 scoring.
        const ScoreV2 = 1 << 29;

        /// First-person camera strafing.
        const FposuStrafing = 1 << 32;
        /// Playfield wobble, first variant.
        const Wobble1 = 1 << 33;
        /// Playfield wobble, second variant.
        const Wobble2 = 1 << 34;
        /// Oscillating approach rate.
        const ArWobble = 1 << 35;
        /// Constant-rate time distortion.
        const Timewarp = 1 << 36;
        /// Approach-rate time distortion.
        const ArTimewarp = 1 << 37;
        /// Objects shrink as they approach.
        const Minimize = 1 << 38;
        /// Cursor fades after movement.
        const FadingCursor = 1 << 39;
        /// First-person playfield.
        const Fps = 1 << 40;
        /// Hit windows shrink with combo, first variant.
        const Jigsaw1 = 1 << 41;
        /// Hit windows shrink with combo, second variant.
        const Jigsaw2 = 1 << 42;
        /// Alternating keys enforced.
        const FullAlternate = 1 << 43;
        /// Sliders play backwards.
        const ReverseSliders = 1 << 44;
        /// 50s count as misses.
        const No50s = 1 << 45;
        /// 100s and 50s count as misses.
        const No100s = 1 << 46;
        /// 300/100-only judgement.
        const Ming3012 = 1 << 47;
        /// Halved hit window.
        const HalfWindow = 1 << 48;
        /// Doubled approach time.
        const Millhioref = 1 << 49;
        /// Approach-frame freeze.
        const Mafham = 1 << 50;
        /// Slider tracking uses the strict lazer rules.
        const StrictTracking = 1 << 51;
        /// Playfield mirrored horizontally.
        const MirrorHorizontal = 1 << 52;
        /// Playfield mirrored vertically.
        const MirrorVertical = 1 << 53;
        /// Combo-dependent object visibility.
        const Shirone = 1 << 54;
        /// Per-object approach-circle styles.
        const ApproachDifferent = 1 << 55;
    }
}

bitflags! {
    /// The third-party on-disk flag word, as stored in legacy score
    /// databases and replay headers.
    #[derive(Default)]
    pub struct LegacyFlags: u32 {
        /// No-Fail.
        const NoFail = 1 << 0;
        /// Easy.
        const Easy = 1 << 1;
        /// Touch device (formerly "no video").
        const TouchDevice = 1 << 2;
        /// Hidden.
        const Hidden = 1 << 3;
        /// Hard Rock.
        const HardRock = 1 << 4;
        /// Sudden Death.
        const SuddenDeath = 1 << 5;
        /// Double Time (150% rate).
        const DoubleTime = 1 << 6;
        /// Relax.
        const Relax = 1 << 7;
        /// Half Time (75% rate).
        const HalfTime = 1 << 8;
        /// Nightcore, only ever set together with DoubleTime.
        const Nightcore = 1 << 9;
        /// Flashlight.
        const Flashlight = 1 << 10;
        /// Autoplay.
        const Autoplay = 1 << 11;
        /// SpunOut.
        const SpunOut = 1 << 12;
        /// Autopilot.
        const Autopilot = 1 << 13;
        /// Perfect.
        const Perfect = 1 << 14;
        /// Target practice.
        const Target = 1 << 23;
        /// ScoreV2.
        const ScoreV2 = 1 << 29;
    }
}

/// Mapping from the "experimental mods" config names stored by legacy
/// variant-B score databases onto the engine flag bits.
///
/// This table is part of the on-disk contract: the names are written
/// verbatim into the database as a semicolon-separated list.
pub const EXPERIMENTAL_MODS: &[(&str, ModFlags)] = &[
    ("fposu_mod_strafing", ModFlags::FposuStrafing),
    ("osu_mod_wobble", ModFlags::Wobble1),
    ("osu_mod_wobble2", ModFlags::Wobble2),
    ("osu_mod_arwobble", ModFlags::ArWobble),
    ("osu_mod_timewarp", ModFlags::Timewarp),
    ("osu_mod_artimewarp", ModFlags::ArTimewarp),
    ("osu_mod_minimize", ModFlags::Minimize),
    ("osu_mod_fadingcursor", ModFlags::FadingCursor),
    ("osu_mod_fps", ModFlags::Fps),
    ("osu_mod_jigsaw1", ModFlags::Jigsaw1),
    ("osu_mod_jigsaw2", ModFlags::Jigsaw2),
    ("osu_mod_fullalternate", ModFlags::FullAlternate),
    ("osu_mod_reverse_sliders", ModFlags::ReverseSliders),
    ("osu_mod_no50s", ModFlags::No50s),
    ("osu_mod_no100s", ModFlags::No100s),
    ("osu_mod_ming3012", ModFlags::Ming3012),
    ("osu_mod_halfwindow", ModFlags::HalfWindow),
    ("osu_mod_millhioref", ModFlags::Millhioref),
    ("osu_mod_mafham", ModFlags::Mafham),
    ("osu_mod_strict_tracking", ModFlags::StrictTracking),
    ("osu_playfield_mirror_horizontal", ModFlags::MirrorHorizontal),
    ("osu_playfield_mirror_vertical", ModFlags::MirrorVertical),
    ("osu_mod_shirone", ModFlags::Shirone),
    ("osu_mod_approach_different", ModFlags::ApproachDifferent),
    ("osu_mod_no_spinners", ModFlags::SpunOut),
];

/// A complete mod selection: discrete flags plus the continuous overrides.
///
/// Rate changes are expressed through `speed` rather than flag bits, so a
/// legacy DoubleTime score and a native 1.5x score compare equal.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Mods {
    /// Selected mod flags.
    pub flags: ModFlags,
    /// Playback rate multiplier. Always greater than zero; 1.0 means unmodified.
    pub speed: f32,
    /// Forced approach rate, or -1.0 for no override.
    pub ar_override: f32,
    /// Forced circle size, or -1.0 for no override.
    pub cs_override: f32,
    /// Forced overall difficulty, or -1.0 for no override.
    pub od_override: f32,
    /// Forced HP drain, or -1.0 for no override.
    pub hp_override: f32,
}

impl Default for Mods {
    fn default() -> Mods {
        Mods {
            flags: ModFlags::empty(),
            speed: 1.0,
            ar_override: -1.0,
            cs_override: -1.0,
            od_override: -1.0,
            hp_override: -1.0,
        }
    }
}

impl Mods {
    /// Convert a legacy flag word. Matching flags are copied bit-for-bit;
    /// DoubleTime/Nightcore become speed 1.5 and HalfTime becomes 0.75.
    pub fn from_legacy(legacy: LegacyFlags) -> Mods {
        let mut flags = ModFlags::empty();
        for (from, to) in [
            (LegacyFlags::NoFail, ModFlags::NoFail),
            (LegacyFlags::Easy, ModFlags::Easy),
            (LegacyFlags::TouchDevice, ModFlags::TouchDevice),
            (LegacyFlags::Hidden, ModFlags::Hidden),
            (LegacyFlags::HardRock, ModFlags::HardRock),
            (LegacyFlags::SuddenDeath, ModFlags::SuddenDeath),
            (LegacyFlags::Relax, ModFlags::Relax),
            (LegacyFlags::Nightcore, ModFlags::Nightcore),
            (LegacyFlags::Flashlight, ModFlags::Flashlight),
            (LegacyFlags::Autoplay, ModFlags::Autoplay),
            (LegacyFlags::SpunOut, ModFlags::SpunOut),
            (LegacyFlags::Autopilot, ModFlags::Autopilot),
            (LegacyFlags::Perfect, ModFlags::Perfect),
            (LegacyFlags::Target, ModFlags::Target),
            (LegacyFlags::ScoreV2, ModFlags::ScoreV2),
        ] {
            if legacy.contains(from) {
                flags |= to;
            }
        }

        let speed = if legacy.intersects(LegacyFlags::DoubleTime | LegacyFlags::Nightcore) {
            1.5
        } else if legacy.contains(LegacyFlags::HalfTime) {
            0.75
        } else {
            1.0
        };

        Mods {
            flags,
            speed,
            ..Mods::default()
        }
    }

    /// Fold a semicolon-separated experimental-mod list (legacy variant-B
    /// storage) into the flag set.
    pub fn apply_experimental(&mut self, list: &str) {
        for name in list.split(';') {
            if name.is_empty() {
                continue;
            }
            if let Some((_, flag)) = EXPERIMENTAL_MODS.iter().find(|(n, _)| *n == name) {
                self.flags |= *flag;
            }
        }
    }

    /// Read the packed form from a native score record: flag word, the four
    /// difficulty overrides, then the speed multiplier. A non-positive
    /// stored speed is sanitized back to 1.0.
    pub fn unpack(reader: &mut Reader) -> Mods {
        let flags = ModFlags::from_bits_truncate(reader.read_u64());
        let ar_override = reader.read_f32();
        let cs_override = reader.read_f32();
        let od_override = reader.read_f32();
        let hp_override = reader.read_f32();
        let mut speed = reader.read_f32();
        if !speed.is_finite() || speed <= 0.0 {
            speed = 1.0;
        }

        Mods {
            flags,
            speed,
            ar_override,
            cs_override,
            od_override,
            hp_override,
        }
    }

    /// Write the packed form, in exactly the order [`Mods::unpack`] consumes.
    pub fn pack(&self, writer: &mut Writer) {
        writer.write_u64(self.flags.bits());
        writer.write_f32(self.ar_override);
        writer.write_f32(self.cs_override);
        writer.write_f32(self.od_override);
        writer.write_f32(self.hp_override);
        writer.write_f32(self.speed);
    }
}

#[cfg(test)]
mod tests {
    use super::{LegacyFlags, ModFlags, Mods};

    #[test]
    fn test_from_legacy_speed() {
        assert_eq!(Mods::from_legacy(LegacyFlags::DoubleTime).speed, 1.5);
        assert_eq!(
            Mods::from_legacy(LegacyFlags::DoubleTime | LegacyFlags::Nightcore).speed,
            1.5
        );
        assert_eq!(Mods::from_legacy(LegacyFlags::HalfTime).speed, 0.75);
        assert_eq!(Mods::from_legacy(LegacyFlags::Hidden).speed, 1.0);
    }

    #[test]
    fn test_from_legacy_flags() {
        let mods = Mods::from_legacy(LegacyFlags::Hidden | LegacyFlags::HardRock);
        assert_eq!(mods.flags, ModFlags::Hidden | ModFlags::HardRock);
    }

    #[test]
    fn test_experimental_list() {
        let mut mods = Mods::default();
        mods.apply_experimental("osu_mod_wobble;;osu_mod_no_spinners;bogus_entry");
        assert_eq!(mods.flags, ModFlags::Wobble1 | ModFlags::SpunOut);
    }
}
