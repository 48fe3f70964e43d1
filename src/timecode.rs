use crate::error::{ReframeError, Result};

/// Parse `MM:SS`, `HH:MM:SS` (either with up to two fractional second digits)
/// into seconds.
pub fn parse_timecode(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let invalid = || {
        ReframeError::invalid_input(format!(
            "Invalid time '{}'. Use MM:SS or HH:MM:SS",
            input
        ))
    };

    let parts: Vec<&str> = trimmed.split(':').collect();
    match parts.as_slice() {
        [minutes, seconds] => {
            let minutes = parse_whole(minutes).ok_or_else(invalid)?;
            let seconds = parse_seconds(seconds).ok_or_else(invalid)?;
            Ok(minutes as f64 * 60.0 + seconds)
        }
        [hours, minutes, seconds] => {
            let hours = parse_whole(hours).ok_or_else(invalid)?;
            if minutes.len() != 2 {
                return Err(invalid());
            }
            let minutes = parse_whole(minutes).filter(|m| *m < 60).ok_or_else(invalid)?;
            let seconds = parse_seconds(seconds).ok_or_else(invalid)?;
            Ok(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
        }
        _ => Err(invalid()),
    }
}

fn parse_whole(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_seconds(s: &str) -> Option<f64> {
    let (whole, fraction) = match s.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (s, None),
    };
    parse_whole(whole)?;
    if let Some(fraction) = fraction {
        if fraction.is_empty() || fraction.len() > 2 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
    }
    s.parse().ok()
}

/// Format seconds as an ffmpeg timestamp (`HH:MM:SS.mmm`).
pub fn format_ffmpeg_time(seconds: f64) -> String {
    let total_milliseconds = (seconds.max(0.0) * 1000.0).round() as u64;
    let hours = total_milliseconds / 3_600_000;
    let minutes = (total_milliseconds % 3_600_000) / 60_000;
    let secs = (total_milliseconds % 60_000) / 1_000;
    let millis = total_milliseconds % 1_000;

    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, secs, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes_seconds() {
        assert_eq!(parse_timecode("1:50").unwrap(), 110.0);
        assert_eq!(parse_timecode("04:00").unwrap(), 240.0);
        assert_eq!(parse_timecode(" 0:05.25 ").unwrap(), 5.25);
    }

    #[test]
    fn test_parse_hours_minutes_seconds() {
        assert_eq!(parse_timecode("1:30:45").unwrap(), 5445.0);
        assert_eq!(parse_timecode("0:00:01.5").unwrap(), 1.5);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "90", "1:2:3:4", "a:10", "1:75:00", "1:5:00", "0:10.123", "-1:00", "1:"] {
            assert!(parse_timecode(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_format_ffmpeg_time() {
        assert_eq!(format_ffmpeg_time(0.0), "00:00:00.000");
        assert_eq!(format_ffmpeg_time(65.123), "00:01:05.123");
        assert_eq!(format_ffmpeg_time(3661.5), "01:01:01.500");
    }
}
