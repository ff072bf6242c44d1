use std::f64::consts::PI;
use std::path::PathBuf;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Smallest width/height a distorted frame may take
pub const MIN_DIMENSION: u32 = 2;

/// Cycles per second used when nothing else is configured
pub const DEFAULT_BOUNCES_PER_SECOND: f64 = 1.9;

/// Encoder bitrate (kbit/s) for periodic effects and the anchor frame
pub const DEFAULT_QUALITY: u32 = 16;

/// Bitrate used for every sporadic frame after the anchor
pub const SPORADIC_QUALITY: u32 = 1;

/// Waveform applied to every frame after the anchor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Height follows |cos|
    Bounce,
    /// Width follows |cos|
    Shutter,
    /// Width and height drawn at random per frame
    Sporadic,
    /// Height follows |cos|, width follows |sin|
    BounceShutter,
}

impl EffectKind {
    /// Keywords checked in priority order; the first substring hit wins
    const KEYWORDS: [(&'static str, EffectKind); 4] = [
        ("bounce_shutter", EffectKind::BounceShutter),
        ("shutter", EffectKind::Shutter),
        ("sporadic", EffectKind::Sporadic),
        ("bounce", EffectKind::Bounce),
    ];

    /// Pick the effect named in free message text, defaulting to `Bounce`
    pub fn from_message(text: &str) -> Self {
        Self::KEYWORDS
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, kind)| *kind)
            .unwrap_or(EffectKind::Bounce)
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            EffectKind::Bounce => "bounce",
            EffectKind::Shutter => "shutter",
            EffectKind::Sporadic => "sporadic",
            EffectKind::BounceShutter => "bounce_shutter",
        }
    }
}

/// Source geometry and timing the waveform is evaluated against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveParams {
    pub frame_rate: f64,
    pub bounces_per_second: f64,
    pub base_width: u32,
    pub base_height: u32,
    pub delta: u32,
}

impl WaveParams {
    pub fn new(frame_rate: f64, bounces_per_second: f64, base_width: u32, base_height: u32) -> Self {
        Self {
            frame_rate,
            bounces_per_second,
            base_width,
            base_height,
            delta: MIN_DIMENSION,
        }
    }

    /// Waveform argument for a frame: index / (fps / bps) * pi
    fn angle(&self, index: u64) -> f64 {
        index as f64 / (self.frame_rate / self.bounces_per_second) * PI
    }
}

/// Target size and encoder quality of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

/// Geometry of one decoded frame, bound to the file it came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDescriptor {
    pub index: u64,
    pub source_file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

impl FrameDescriptor {
    pub fn new(index: u64, source_file: PathBuf, geometry: FrameGeometry) -> Self {
        Self {
            index,
            source_file,
            width: geometry.width,
            height: geometry.height,
            quality: geometry.quality,
        }
    }
}

/// Compute the size and quality for frame `index`.
///
/// Frame 0 is the anchor and always keeps the source size. Every later frame is
/// squeezed along one or both axes, never below `params.delta`.
pub fn effect_frame(index: u64, params: &WaveParams, kind: EffectKind) -> FrameGeometry {
    let base = FrameGeometry {
        width: params.base_width,
        height: params.base_height,
        quality: DEFAULT_QUALITY,
    };
    if index == 0 {
        return base;
    }

    let angle = params.angle(index);
    let delta = params.delta;

    match kind {
        EffectKind::Bounce => FrameGeometry {
            height: scale(angle.cos(), params.base_height, delta),
            ..base
        },
        EffectKind::Shutter => FrameGeometry {
            width: scale(angle.cos(), params.base_width, delta),
            ..base
        },
        EffectKind::Sporadic => {
            let mut rng = rand::thread_rng();
            FrameGeometry {
                width: scale(rng.gen::<f64>(), params.base_width, delta),
                height: scale(rng.gen::<f64>(), params.base_height, delta),
                quality: SPORADIC_QUALITY,
            }
        }
        EffectKind::BounceShutter => FrameGeometry {
            width: scale(angle.sin(), params.base_width, delta),
            height: scale(angle.cos(), params.base_height, delta),
            ..base
        },
    }
}

/// floor(|factor| * (dimension - delta)) + delta
fn scale(factor: f64, dimension: u32, delta: u32) -> u32 {
    let span = dimension.saturating_sub(delta) as f64;
    (factor.abs() * span).floor() as u32 + delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(fps: f64, w: u32, h: u32) -> WaveParams {
        WaveParams::new(fps, DEFAULT_BOUNCES_PER_SECOND, w, h)
    }

    fn any_kind() -> impl Strategy<Value = EffectKind> {
        prop_oneof![
            Just(EffectKind::Bounce),
            Just(EffectKind::Shutter),
            Just(EffectKind::Sporadic),
            Just(EffectKind::BounceShutter),
        ]
    }

    #[test]
    fn test_keyword_priority() {
        assert_eq!(EffectKind::from_message("!render"), EffectKind::Bounce);
        assert_eq!(EffectKind::from_message("!render bounce"), EffectKind::Bounce);
        assert_eq!(EffectKind::from_message("!render shutter"), EffectKind::Shutter);
        assert_eq!(EffectKind::from_message("!render sporadic"), EffectKind::Sporadic);
        assert_eq!(EffectKind::from_message("!render bounce_shutter"), EffectKind::BounceShutter);
        // "shutter" outranks "sporadic" and "bounce" wherever they appear
        assert_eq!(EffectKind::from_message("!render sporadic bounce shutter"), EffectKind::Shutter);
    }

    #[test]
    fn test_bounce_golden_values() {
        // 30 fps at 1.9 bps: angle = i / (30 / 1.9) * pi
        let p = params(30.0, 640, 480);
        let g = effect_frame(1, &p, EffectKind::Bounce);
        let expected = ((1.0f64 / (30.0 / 1.9) * PI).cos().abs() * 478.0).floor() as u32 + 2;
        assert_eq!(g, FrameGeometry { width: 640, height: expected, quality: 16 });

        let s = effect_frame(1, &p, EffectKind::Shutter);
        let expected = ((1.0f64 / (30.0 / 1.9) * PI).cos().abs() * 638.0).floor() as u32 + 2;
        assert_eq!(s, FrameGeometry { width: expected, height: 480, quality: 16 });
    }

    #[test]
    fn test_deterministic_kinds_repeat() {
        let p = params(29.97, 1280, 720);
        for kind in [EffectKind::Bounce, EffectKind::Shutter, EffectKind::BounceShutter] {
            for i in 0..120 {
                assert_eq!(effect_frame(i, &p, kind), effect_frame(i, &p, kind));
            }
        }
    }

    #[test]
    fn test_bounce_shutter_peaks_do_not_coincide() {
        let p = params(30.0, 640, 480);
        let mut height_peaks = 0;
        for i in 1..600 {
            let g = effect_frame(i, &p, EffectKind::BounceShutter);
            assert!(
                !(g.width == p.base_width && g.height == p.base_height),
                "frame {} hit both peaks",
                i
            );
            // near a cosine extremum the sine term is near zero
            if g.height >= p.base_height - 2 {
                height_peaks += 1;
                assert!(g.width < p.base_width / 2, "frame {} width {} at height peak", i, g.width);
            }
        }
        assert!(height_peaks > 0);
    }

    #[test]
    fn test_dimension_below_delta_is_clamped() {
        let p = params(30.0, 1, 1);
        let g = effect_frame(3, &p, EffectKind::BounceShutter);
        assert_eq!(g.width, MIN_DIMENSION);
        assert_eq!(g.height, MIN_DIMENSION);
    }

    proptest! {
        #[test]
        fn test_anchor_frame_is_untouched(
            kind in any_kind(),
            fps in 1.0f64..120.0,
            w in 2u32..4096,
            h in 2u32..4096,
        ) {
            let g = effect_frame(0, &params(fps, w, h), kind);
            prop_assert_eq!(g, FrameGeometry { width: w, height: h, quality: DEFAULT_QUALITY });
        }

        #[test]
        fn test_bounce_only_moves_height(
            index in 1u64..100_000,
            fps in 1.0f64..120.0,
            w in 2u32..4096,
            h in 2u32..4096,
        ) {
            let g = effect_frame(index, &params(fps, w, h), EffectKind::Bounce);
            prop_assert_eq!(g.width, w);
            prop_assert!(g.height >= MIN_DIMENSION && g.height <= h);
            prop_assert_eq!(g.quality, DEFAULT_QUALITY);
        }

        #[test]
        fn test_shutter_only_moves_width(
            index in 1u64..100_000,
            fps in 1.0f64..120.0,
            w in 2u32..4096,
            h in 2u32..4096,
        ) {
            let g = effect_frame(index, &params(fps, w, h), EffectKind::Shutter);
            prop_assert_eq!(g.height, h);
            prop_assert!(g.width >= MIN_DIMENSION && g.width <= w);
        }

        #[test]
        fn test_sporadic_stays_in_bounds(
            index in 1u64..100_000,
            w in 3u32..4096,
            h in 3u32..4096,
        ) {
            let g = effect_frame(index, &params(30.0, w, h), EffectKind::Sporadic);
            prop_assert!(g.width >= MIN_DIMENSION && g.width < w);
            prop_assert!(g.height >= MIN_DIMENSION && g.height < h);
            prop_assert_eq!(g.quality, SPORADIC_QUALITY);
        }
    }
}
