//! Unsigned byte stream -> smoothed signed signal -> peak state machine -> wave classification.

const AVERAGE_WINDOW: usize = 16;
const PERCENT_TO_PEAK: i32 = 6;
const MIN_DOTS: usize = 9;
const MIN_P2P: i32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeakKind {
    Unknown,
    TpSt,
    TpEnd,
    BtSt,
    BtEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dot {
    pub time: usize,
    pub val: i32,
    pub peak: PeakKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveType {
    Unknown,
    Sine,
    Square,
}

#[derive(Debug, Clone)]
pub struct Wave {
    pub dots: Vec<Dot>,
    pub typ: WaveType,
    pub p2p: i32,
    pub vpp: Option<f64>,
}

/// Map an unsigned DAC byte to its signed interpretation.
fn one_byte_sign(n: u8) -> i32 {
    if n < 128 {
        n as i32
    } else {
        -((n as i32) & 0x7F)
    }
}

fn conv_sign(data: &[u8]) -> Vec<i32> {
    data.iter().map(|&b| one_byte_sign(b)).collect()
}

/// 16-sample moving average, truncating integer division like the source.
fn average(data: &[i32]) -> Vec<i32> {
    if data.len() < AVERAGE_WINDOW {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(data.len() - AVERAGE_WINDOW);
    for start in 0..(data.len() - AVERAGE_WINDOW) {
        let sum: i32 = data[start..start + AVERAGE_WINDOW].iter().sum();
        out.push(sum / AVERAGE_WINDOW as i32);
    }
    out
}

fn detect_dots(smoothed: &[i32]) -> Vec<Dot> {
    if smoothed.is_empty() {
        return Vec::new();
    }
    let top = *smoothed.iter().max().unwrap();
    let bottom = *smoothed.iter().min().unwrap();
    let margin = (top - bottom) * PERCENT_TO_PEAK / 100;
    let top_area = top - margin;
    let bottom_area = bottom + margin;

    let mut dots = Vec::new();
    let mut state = if smoothed[0] > top_area {
        PeakKind::TpSt
    } else if smoothed[0] < bottom_area {
        PeakKind::BtSt
    } else {
        PeakKind::Unknown
    };
    if state != PeakKind::Unknown {
        dots.push(Dot {
            time: 0,
            val: smoothed[0],
            peak: state,
        });
    }

    for (time, &val) in smoothed.iter().enumerate().skip(1) {
        let next = match state {
            PeakKind::TpSt if val < top_area => Some(PeakKind::TpEnd),
            PeakKind::TpEnd if val < bottom_area => Some(PeakKind::BtSt),
            PeakKind::BtSt if val > bottom_area => Some(PeakKind::BtEnd),
            PeakKind::BtEnd if val > top_area => Some(PeakKind::TpSt),
            PeakKind::Unknown if val > top_area => Some(PeakKind::TpSt),
            PeakKind::Unknown if val < bottom_area => Some(PeakKind::BtSt),
            _ => None,
        };
        if let Some(kind) = next {
            state = kind;
            dots.push(Dot {
                time,
                val,
                peak: kind,
            });
        }
    }

    dots
}

/// Scan from the end for the last complete four-dot wave TP_ST,TP_END,BT_ST,BT_END.
fn get_last_wave(dots: &[Dot]) -> Option<[Dot; 4]> {
    let k = dots.iter().rposition(|d| d.peak == PeakKind::BtEnd)?;
    if k < 3 {
        return None;
    }
    Some([dots[k - 3], dots[k - 2], dots[k - 1], dots[k]])
}

fn classify_type(wave: &[Dot; 4]) -> WaveType {
    let half = wave[2].time as f64 - wave[0].time as f64;
    let tp_end_time = wave[1].time as f64;
    let start_time = wave[0].time as f64;

    if tp_end_time < start_time + (half * 0.35).floor() {
        WaveType::Sine
    } else if tp_end_time > start_time + half * 0.80 {
        WaveType::Square
    } else {
        WaveType::Unknown
    }
}

/// Run the full three-stage pipeline over one channel's raw unsigned samples.
pub fn get_wave_form(unsigned_data: &[u8]) -> Wave {
    let signed = conv_sign(unsigned_data);
    let smoothed = average(&signed);
    let dots = detect_dots(&smoothed);

    let p2p = match (dots.iter().map(|d| d.val).max(), dots.iter().map(|d| d.val).min()) {
        (Some(top), Some(bottom)) => (top - bottom).abs(),
        _ => 0,
    };

    if dots.len() < MIN_DOTS || p2p < MIN_P2P {
        return Wave {
            dots,
            typ: WaveType::Unknown,
            p2p,
            vpp: None,
        };
    }

    let typ = match get_last_wave(&dots) {
        Some(last) => classify_type(&last),
        None => WaveType::Unknown,
    };

    Wave {
        dots,
        typ,
        p2p,
        vpp: None,
    }
}

/// Synchronization check: does the sine's positive peak lie inside the
/// square's positive plateau?
pub fn is_top_sine_inside_top_square(sine_dots: &[Dot], square_dots: &[Dot]) -> bool {
    let skip = sine_dots.len() / 3;
    let sine_tail = &sine_dots[skip.min(sine_dots.len())..];

    let s_start = match sine_tail.iter().find(|d| d.peak == PeakKind::TpSt) {
        Some(d) => *d,
        None => return false,
    };
    let s_end = match sine_tail
        .iter()
        .find(|d| d.peak == PeakKind::TpEnd && d.time > s_start.time)
    {
        Some(d) => *d,
        None => return false,
    };

    let square_tp_end_pos = square_dots
        .iter()
        .position(|d| d.peak == PeakKind::TpEnd && d.time > s_end.time && d.time > s_start.time);
    let square_tp_end_pos = match square_tp_end_pos {
        Some(p) if p > 0 => p,
        _ => return false,
    };
    let square_tp_st = square_dots[square_tp_end_pos - 1];

    square_tp_st.time < s_start.time
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_byte_sign_law() {
        assert_eq!(one_byte_sign(0), 0);
        assert_eq!(one_byte_sign(127), 127);
        assert_eq!(one_byte_sign(128), 0);
        assert_eq!(one_byte_sign(255), -127);
        assert_eq!(one_byte_sign(200), -72);
    }

    #[test]
    fn average_output_length() {
        let data = vec![0i32; 30];
        assert_eq!(average(&data).len(), 14);
        let short = vec![0i32; 10];
        assert_eq!(average(&short).len(), 0);
    }

    fn dot(time: usize, peak: PeakKind) -> Dot {
        Dot { time, val: 0, peak }
    }

    #[test]
    fn classifies_sine_from_narrow_plateau() {
        let wave = [
            dot(210, PeakKind::TpSt),
            dot(215, PeakKind::TpEnd),
            dot(230, PeakKind::BtSt),
            dot(235, PeakKind::BtEnd),
        ];
        assert_eq!(classify_type(&wave), WaveType::Sine);
    }

    #[test]
    fn classifies_square_from_wide_plateau() {
        let wave = [
            dot(210, PeakKind::TpSt),
            dot(227, PeakKind::TpEnd),
            dot(230, PeakKind::BtSt),
            dot(247, PeakKind::BtEnd),
        ];
        assert_eq!(classify_type(&wave), WaveType::Square);
    }

    #[test]
    fn last_wave_picks_final_four_dots() {
        let dots = vec![
            dot(100, PeakKind::TpSt),
            dot(105, PeakKind::TpEnd),
            dot(120, PeakKind::BtSt),
            dot(125, PeakKind::BtEnd),
            dot(210, PeakKind::TpSt),
            dot(220, PeakKind::TpEnd),
            dot(230, PeakKind::BtSt),
            dot(240, PeakKind::BtEnd),
        ];
        let last = get_last_wave(&dots).unwrap();
        assert_eq!(
            [last[0].time, last[1].time, last[2].time, last[3].time],
            [210, 220, 230, 240]
        );
    }

    #[test]
    fn last_wave_none_without_bt_end() {
        let dots = vec![dot(1, PeakKind::TpSt), dot(2, PeakKind::TpEnd)];
        assert!(get_last_wave(&dots).is_none());
    }

    #[test]
    fn sine_inside_square_true_when_square_spans_wider() {
        let sine = vec![
            dot(100, PeakKind::BtEnd),
            dot(210, PeakKind::TpSt),
            dot(215, PeakKind::TpEnd),
        ];
        let square = vec![dot(205, PeakKind::TpSt), dot(220, PeakKind::TpEnd)];
        assert!(is_top_sine_inside_top_square(&sine, &square));
    }

    #[test]
    fn sine_inside_square_false_when_square_starts_later() {
        let sine = vec![
            dot(100, PeakKind::BtEnd),
            dot(210, PeakKind::TpSt),
            dot(215, PeakKind::TpEnd),
        ];
        let square = vec![dot(212, PeakKind::TpSt), dot(220, PeakKind::TpEnd)];
        assert!(!is_top_sine_inside_top_square(&sine, &square));
    }

    #[test]
    fn small_signal_below_threshold_is_unknown() {
        let mut data = vec![128u8; 40];
        for (i, b) in data.iter_mut().enumerate() {
            *b = if i % 2 == 0 { 120 } else { 136 };
        }
        let wave = get_wave_form(&data);
        assert_eq!(wave.typ, WaveType::Unknown);
    }
}
