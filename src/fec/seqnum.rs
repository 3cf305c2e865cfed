//! 序列号回绕校正
//!
//! 窗口 `[snbase, snbase+N)` 跨越 65535→0 时，把小于 snbase 的序列号加上 65536，
//! 使窗口内的比较和位图索引都在单调的扩展空间里进行。

/// 序列号空间大小
const SEQ_SPACE: u32 = 1 << 16;

/// 相对窗口的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// 窗口内，值为相对 snbase 的偏移
    Inside(usize),
    /// 窗口之后（新的流量）
    Ahead,
    /// 窗口之前（过期的包）
    Behind,
}

/// 把16位序列号校正到以 snbase 为基准的扩展空间
pub fn correct_seqnum(seqnum: u16, snbase: u16, num_media_packets: usize) -> u32 {
    let snbase = snbase as u32;
    let snend = snbase + num_media_packets as u32;
    let seqnum = seqnum as u32;

    if snend > SEQ_SPACE && seqnum < snbase {
        seqnum + SEQ_SPACE
    } else {
        seqnum
    }
}

/// 判断序列号相对窗口的位置
///
/// 窗口内的判断使用校正后的序列号；窗口外的前后关系使用16位有符号距离。
pub fn window_position(seqnum: u16, snbase: u16, num_media_packets: usize) -> WindowPosition {
    let corrected = correct_seqnum(seqnum, snbase, num_media_packets);
    let base = snbase as u32;

    if corrected >= base && corrected < base + num_media_packets as u32 {
        return WindowPosition::Inside((corrected - base) as usize);
    }

    if (seqnum.wrapping_sub(snbase) as i16) < 0 {
        WindowPosition::Behind
    } else {
        WindowPosition::Ahead
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wrap() {
        assert_eq!(correct_seqnum(1005, 1000, 9), 1005);
        assert_eq!(window_position(1000, 1000, 9), WindowPosition::Inside(0));
        assert_eq!(window_position(1008, 1000, 9), WindowPosition::Inside(8));
        assert_eq!(window_position(1009, 1000, 9), WindowPosition::Ahead);
        assert_eq!(window_position(999, 1000, 9), WindowPosition::Behind);
    }

    #[test]
    fn test_wraparound_window() {
        // N=4, snbase=65534: 65534, 65535, 0, 1 -> 位置 0..3
        let positions: Vec<_> = [65534u16, 65535, 0, 1]
            .iter()
            .map(|&s| window_position(s, 65534, 4))
            .collect();
        assert_eq!(
            positions,
            vec![
                WindowPosition::Inside(0),
                WindowPosition::Inside(1),
                WindowPosition::Inside(2),
                WindowPosition::Inside(3),
            ]
        );

        assert_eq!(correct_seqnum(0, 65534, 4), 65536);
        assert_eq!(window_position(2, 65534, 4), WindowPosition::Ahead);
        assert_eq!(window_position(65533, 65534, 4), WindowPosition::Behind);
    }

    #[test]
    fn test_behind_across_wrap() {
        // 窗口刚过回绕点，回绕前的包属于过期流量
        assert_eq!(window_position(65533, 5, 9), WindowPosition::Behind);
        assert_eq!(window_position(14, 5, 9), WindowPosition::Ahead);
    }

    #[test]
    fn test_window_ending_exactly_at_wrap() {
        // snbase + N == 65536 时不需要校正
        assert_eq!(correct_seqnum(0, 65532, 4), 0);
        assert_eq!(window_position(65535, 65532, 4), WindowPosition::Inside(3));
        assert_eq!(window_position(0, 65532, 4), WindowPosition::Ahead);
    }
}
