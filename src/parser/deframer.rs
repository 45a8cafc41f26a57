use crate::{
    parser::frame::{Frame, get_length},
    types::{BASIC_FLAG, MAX_BUF_SIZE, MAX_HDR_SIZE, MAX_TOTAL_FRAME_SIZE},
};

/// accumulates raw transport bytes and cuts them into validated frames
///
/// any loss of framing, be it an absurd length, a bad FCS or a missing closing flag,
/// moves the scan exactly one byte past the abandoned start flag
pub struct Deframer {
    buf: Box<[u8]>,
    len: usize,
    /// offset of the opening flag of the frame being assembled
    start: Option<usize>,
    /// total length of that frame, flags included, once its header arrived
    frame_len: Option<usize>,
    max_frame_len: usize,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_len(MAX_TOTAL_FRAME_SIZE)
    }

    #[must_use]
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buf: vec![0; MAX_BUF_SIZE].into_boxed_slice(),
            len: 0,
            start: None,
            frame_len: None,
            max_frame_len,
        }
    }

    /// the free tail of the buffer, read from the transport straight into it
    pub fn spare(&mut self) -> &mut [u8] {
        &mut self.buf[self.len..]
    }

    /// marks `n` bytes of the spare tail as filled
    pub fn advance(&mut self, n: usize) {
        self.len = (self.len + n).min(self.buf.len());
    }

    /// copies as much of `data` as fits, returns how much that was
    pub fn extend(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&data[..n]);
        self.len += n;
        n
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.len
    }

    /// drops everything, used when the transport restarts
    pub fn reset(&mut self) {
        self.len = 0;
        self.start = None;
        self.frame_len = None;
    }

    fn abandon(&mut self, start: usize) -> usize {
        self.start = None;
        self.frame_len = None;
        start + 1
    }

    /// runs one pass over the buffered bytes and hands out every complete frame
    pub fn process(&mut self, mut on_frame: impl FnMut(Frame)) {
        // still waiting for the rest of a frame whose size is already known
        if let (Some(start), Some(frame_len)) = (self.start, self.frame_len)
            && self.len - start < frame_len
        {
            return;
        }

        let mut search = 0;

        loop {
            let Some(start) = self.start else {
                self.frame_len = None;

                match self.buf[search.min(self.len)..self.len]
                    .iter()
                    .position(|&b| b == BASIC_FLAG)
                {
                    Some(pos) => {
                        self.start = Some(search + pos);
                        continue;
                    }
                    None => {
                        // nothing that could start a frame, throw it all away
                        self.len = 0;
                        break;
                    }
                }
            };

            let available = self.len - start;

            // two flags in a row, the first one closed whatever came before
            if self.frame_len.is_none() && available >= 2 && self.buf[start + 1] == BASIC_FLAG {
                self.start = Some(start + 1);
                continue;
            }

            if self.frame_len.is_none() && available > MAX_HDR_SIZE {
                let frame_len = match get_length(&self.buf[start + 3..start + 5]) {
                    Some((len, 1)) => MAX_HDR_SIZE + len + 1,
                    Some((len, _)) => MAX_HDR_SIZE + len + 2,
                    None => usize::MAX,
                };

                if frame_len > self.max_frame_len {
                    log::warn!(
                        target: "ts0710mux::deframer",
                        "frame length {frame_len} exceeds {}, resyncing",
                        self.max_frame_len
                    );
                    search = self.abandon(start);
                    continue;
                }

                self.frame_len = Some(frame_len);
            }

            if let Some(frame_len) = self.frame_len
                && available >= frame_len
            {
                if self.buf[start + frame_len - 1] != BASIC_FLAG {
                    log::warn!(target: "ts0710mux::deframer", "lost sync, no closing flag at {frame_len}");
                    search = self.abandon(start);
                    continue;
                }

                match Frame::decode(&self.buf[start + 1..start + frame_len - 1]) {
                    Ok(frame) => {
                        on_frame(frame);
                        self.start = None;
                        self.frame_len = None;
                        search = start + frame_len;
                    }
                    Err(e) => {
                        log::warn!(target: "ts0710mux::deframer", "dropping frame: {e}");
                        search = self.abandon(start);
                    }
                }
                continue;
            }

            // partial frame, move it to the front so the next read has room
            if start != 0 {
                self.buf.copy_within(start..self.len, 0);
                self.len -= start;
                self.start = Some(0);
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::types::SHORT_PAYLOAD_SIZE;

    fn uih(dlci: u8, payload: &'static [u8]) -> Bytes {
        Frame::builder()
            .address(dlci, true)
            .uih(Bytes::from_static(payload))
            .build()
            .encode()
    }

    fn collect(deframer: &mut Deframer, data: &[u8]) -> Vec<Frame> {
        let mut frames = vec![];
        assert_eq!(deframer.extend(data), data.len());
        deframer.process(|f| frames.push(f));
        frames
    }

    #[test]
    fn single_frame() {
        let mut deframer = Deframer::new();
        let frames = collect(&mut deframer, &uih(5, b"ATZ\r"));

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dlci(), 5);
        assert_eq!(frames[0].payload.as_ref(), b"ATZ\r");
        assert_eq!(deframer.buffered(), 0);
    }

    #[test]
    fn frame_split_across_reads() {
        let mut deframer = Deframer::new();
        let wire = uih(2, b"split me please");

        for chunk in wire[..wire.len() - 1].chunks(3) {
            assert!(collect(&mut deframer, chunk).is_empty());
        }

        let frames = collect(&mut deframer, &wire[wire.len() - 1..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"split me please");
    }

    #[test]
    fn long_frames_on_both_sides_of_the_threshold() {
        let mut deframer = Deframer::new();

        for len in [SHORT_PAYLOAD_SIZE, SHORT_PAYLOAD_SIZE + 1] {
            let payload = Bytes::from(vec![0x42; len]);
            let wire = Frame::builder().address(7, false).uih(payload.clone()).build().encode();

            let frames = collect(&mut deframer, &wire);
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].payload, payload);
        }
    }

    #[test]
    fn resync_after_corrupt_fcs() {
        let first = uih(1, b"first");
        let mut second = uih(2, b"second").to_vec();
        let fcs = second.len() - 2;
        second[fcs] ^= 0xFF;
        let third = uih(3, b"third");

        let mut wire = first.to_vec();
        wire.extend_from_slice(&second);
        wire.extend_from_slice(&third);

        let mut deframer = Deframer::new();
        let frames = collect(&mut deframer, &wire);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload.as_ref(), b"first");
        assert_eq!(frames[1].payload.as_ref(), b"third");
        assert_eq!(frames[1].dlci(), 3);
    }

    #[test]
    fn resync_after_missing_closing_flag() {
        let mut broken = uih(2, b"broken").to_vec();
        let last = broken.len() - 1;
        broken[last] = 0x00;

        let mut wire = broken;
        wire.extend_from_slice(&uih(4, b"intact"));

        let mut deframer = Deframer::new();
        let frames = collect(&mut deframer, &wire);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"intact");
    }

    #[test]
    fn oversized_length_is_never_decoded() {
        let claimed = MAX_TOTAL_FRAME_SIZE;
        let mut wire = vec![
            BASIC_FLAG,
            0x07,
            0xEF,
            ((claimed & 0x7F) << 1) as u8,
            (claimed >> 7) as u8,
            0x00,
        ];
        wire.extend_from_slice(&uih(6, b"after"));

        let mut deframer = Deframer::new();
        let frames = collect(&mut deframer, &wire);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].dlci(), 6);
    }

    #[test]
    fn garbage_without_flag_is_dropped() {
        let mut deframer = Deframer::new();
        assert!(collect(&mut deframer, b"no flags in here").is_empty());
        assert_eq!(deframer.buffered(), 0);
    }

    #[test]
    fn partial_frame_is_compacted() {
        let wire = uih(9, b"0123456789");
        let mut data = b"junk".to_vec();
        data.extend_from_slice(&wire[..8]);

        let mut deframer = Deframer::new();
        assert!(collect(&mut deframer, &data).is_empty());
        assert_eq!(deframer.buffered(), 8);

        let frames = collect(&mut deframer, &wire[8..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.as_ref(), b"0123456789");
    }
}
