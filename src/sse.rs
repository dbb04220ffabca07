/// Incremental server-sent-event parser.
///
/// The execution stream arrives as arbitrary byte chunks; a single chunk may
/// contain several frames or end in the middle of a line, so the parser
/// buffers bytes and only emits a frame once the terminating blank line has
/// been seen.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes; returns every frame completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        while let Some(newline_index) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let mut line = self.buffer.drain(..=newline_index).collect::<Vec<_>>();
            if matches!(line.last(), Some(b'\n')) {
                line.pop();
            }
            if matches!(line.last(), Some(b'\r')) {
                line.pop();
            }
            self.handle_line(&line, &mut frames);
        }
        frames
    }

    fn handle_line(&mut self, line: &[u8], frames: &mut Vec<SseFrame>) {
        if line.is_empty() {
            // Blank line terminates a frame.
            if self.event.is_some() || !self.data_lines.is_empty() {
                frames.push(SseFrame {
                    event: self.event.take().unwrap_or_else(|| "message".to_string()),
                    data: self.data_lines.join("\n"),
                });
                self.data_lines.clear();
            }
            return;
        }

        let line = String::from_utf8_lossy(line);
        if line.starts_with(':') {
            // Comment / keep-alive.
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line.as_ref(), ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data_lines.push(value.to_string()),
            // "id" and "retry" are not used by the execution stream.
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: progress\ndata: {\"progress\": 40}\n\n");
        assert_eq!(
            frames,
            vec![SseFrame {
                event: "progress".to_string(),
                data: "{\"progress\": 40}".to_string(),
            }]
        );
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"event: comp").is_empty());
        assert!(parser.push(b"leted\ndata: {\"output_id\"").is_empty());
        let frames = parser.push(b": \"o1\"}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "completed");
        assert_eq!(frames[0].data, "{\"output_id\": \"o1\"}");
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: status\ndata: {}\n\nevent: error\ndata: {\"error\": \"x\"}\n\n");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event, "status");
        assert_eq!(frames[1].event, "error");
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: status\r\ndata: {}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "status");
        assert_eq!(frames[0].data, "{}");
    }

    #[test]
    fn test_comments_and_unknown_fields_ignored() {
        let mut parser = SseParser::new();
        let frames = parser.push(b": keep-alive\nid: 7\nevent: status\ndata: {}\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event, "status");
    }

    #[test]
    fn test_default_event_name_is_message() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"data: hello\n\n");
        assert_eq!(frames[0].event, "message");
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn test_multi_line_data_joined() {
        let mut parser = SseParser::new();
        let frames = parser.push(b"event: status\ndata: line one\ndata: line two\n\n");
        assert_eq!(frames[0].data, "line one\nline two");
    }

    #[test]
    fn test_blank_lines_without_pending_frame_emit_nothing() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"\n\n\n").is_empty());
    }
}
