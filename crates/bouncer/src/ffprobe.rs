use serde::Deserialize;
use crate::error::{MediaError, MediaResult};

/// ffprobe output for `-select_streams v -show_entries stream=r_frame_rate,width,height`
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub width: Option<u32>,
    pub height: Option<u32>,
    #[serde(rename = "r_frame_rate")]
    pub r_frame_rate: Option<String>,
}

/// What the pipeline needs to know about the source video
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// Frame rate exactly as ffprobe printed it ("30000/1001"); handed back to the encoder
    pub frame_rate: String,
    /// The same rate as frames per second
    pub fps: f64,
}

impl VideoInfo {
    /// Parse ffprobe JSON and keep the first video stream
    pub fn from_probe_json(json: &str) -> MediaResult<Self> {
        let data: FFProbeData = serde_json::from_str(json.trim())?;
        let stream = data
            .streams
            .into_iter()
            .next()
            .ok_or_else(|| MediaError::Probe("no video stream".to_string()))?;

        let width = stream
            .width
            .filter(|w| *w > 0)
            .ok_or_else(|| MediaError::Probe("video stream has no width".to_string()))?;
        let height = stream
            .height
            .filter(|h| *h > 0)
            .ok_or_else(|| MediaError::Probe("video stream has no height".to_string()))?;
        let frame_rate = stream
            .r_frame_rate
            .ok_or_else(|| MediaError::Probe("video stream has no frame rate".to_string()))?;
        let fps = parse_frame_rate(&frame_rate)
            .ok_or_else(|| MediaError::Probe(format!("invalid frame rate: {}", frame_rate)))?;

        Ok(VideoInfo { width, height, frame_rate, fps })
    }
}

/// Parse a frame rate string ("30/1", "30000/1001", "29.97") into frames per second
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<f64> {
    let frame_rate_str = frame_rate_str.trim();

    // Try parsing as fraction (e.g., "30/1")
    if let Some((num_str, den_str)) = frame_rate_str.split_once('/') {
        let num = num_str.trim().parse::<f64>().ok()?;
        let den = den_str.trim().parse::<f64>().ok()?;
        if den != 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }

    // Try parsing as decimal (e.g., "29.97")
    frame_rate_str
        .parse::<f64>()
        .ok()
        .filter(|f| *f > 0.0 && f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_probe_output() {
        let json = r#"
        {
            "programs": [],
            "streams": [
                { "width": 1280, "height": 720, "r_frame_rate": "30000/1001" }
            ]
        }"#;
        let info = VideoInfo::from_probe_json(json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert_eq!(info.frame_rate, "30000/1001");
        assert!((info.fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_no_stream_is_probe_error() {
        let err = VideoInfo::from_probe_json(r#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, MediaError::Probe(_)));

        let err = VideoInfo::from_probe_json("{}").unwrap_err();
        assert!(matches!(err, MediaError::Probe(_)));
    }

    #[test]
    fn test_zero_frame_rate_is_rejected() {
        let json = r#"{"streams": [{ "width": 10, "height": 10, "r_frame_rate": "0/0" }]}"#;
        assert!(VideoInfo::from_probe_json(json).is_err());
    }

    #[test]
    fn test_frame_rate_forms() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("29.97"), Some(29.97));
        assert_eq!(parse_frame_rate("24/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
        assert_eq!(parse_frame_rate("-5"), None);
    }

    proptest! {
        #[test]
        fn test_rational_rates(num in 1u32..240_000, den in 1u32..10_000) {
            let fps = parse_frame_rate(&format!("{}/{}", num, den)).unwrap();
            prop_assert!((fps - num as f64 / den as f64).abs() < 1e-9);
        }
    }
}
