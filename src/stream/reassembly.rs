/// Unterminated input beyond this is discarded [bytes]
const MAX_PENDING: usize = 64 * 1024;

/// Splits an arbitrary chunk stream into text lines.
///
/// Partial data stays buffered between calls, so a line cut by a dropped
/// link is completed by the first chunk of the next session.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = &self.buffer[start..end];
            if let Some((&b'\r', rest)) = line.split_last() {
                line = rest;
            }
            // Blank lines carry nothing
            if !line.is_empty() {
                lines.push(String::from_utf8_lossy(line).into_owned());
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_PENDING {
            log::warn!(
                "Dropping {} bytes of unterminated input",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        lines
    }

    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const STREAM: &[u8] = b"0.10,0.05,9.81\r\n1.5,-2.25,9.7\n\n-0.1,0.0,9.8\r\n3,4,";

    #[test]
    fn test_whole_chunk() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(STREAM);
        assert_eq!(lines, vec!["0.10,0.05,9.81", "1.5,-2.25,9.7", "-0.1,0.0,9.8"]);
        assert_eq!(assembler.pending(), b"3,4,");
    }

    #[test]
    fn test_single_byte_chunks() {
        let mut assembler = LineAssembler::new();
        let mut lines = Vec::new();
        for byte in STREAM {
            lines.extend(assembler.push(std::slice::from_ref(byte)));
        }
        assert_eq!(lines, vec!["0.10,0.05,9.81", "1.5,-2.25,9.7", "-0.1,0.0,9.8"]);
        assert_eq!(assembler.pending(), b"3,4,");
    }

    #[test]
    fn test_line_survives_reconnect() {
        let mut assembler = LineAssembler::new();
        assert!(assembler.push(b"0.5,0.").is_empty());
        // link drops here, the next session continues the same assembler
        assert_eq!(assembler.push(b"25,9.8\n"), vec!["0.5,0.25,9.8"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut assembler = LineAssembler::new();
        let lines = assembler.push(b"Temp\xff: 20 C\n");
        assert_eq!(lines, vec!["Temp\u{fffd}: 20 C"]);
    }

    #[test]
    fn test_runaway_input_is_dropped() {
        let mut assembler = LineAssembler::new();
        let junk = vec![b'x'; MAX_PENDING + 1];
        assert!(assembler.push(&junk).is_empty());
        assert!(assembler.pending().is_empty());
        assert_eq!(assembler.push(b"1,2,3\n"), vec!["1,2,3"]);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_lines(cuts in proptest::collection::vec(0usize..STREAM.len(), 0..12)) {
            let mut cuts = cuts;
            cuts.push(0);
            cuts.push(STREAM.len());
            cuts.sort_unstable();

            let mut assembler = LineAssembler::new();
            let mut lines = Vec::new();
            for pair in cuts.windows(2) {
                lines.extend(assembler.push(&STREAM[pair[0]..pair[1]]));
            }

            prop_assert_eq!(lines, vec!["0.10,0.05,9.81", "1.5,-2.25,9.7", "-0.1,0.0,9.8"]);
            prop_assert_eq!(assembler.pending(), b"3,4,");
        }
    }
}
