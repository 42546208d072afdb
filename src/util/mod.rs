mod queue;

pub(crate) use self::queue::InputQueue;

/// Renders `data` in the classic hex+ascii dump format, 16 bytes per line.
/// Only meant for trace-level logging.
pub(crate) fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (offset, chunk) in data.chunks(16).enumerate() {
        out.push_str(&format!("{:04x}: ", offset * 16));
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!("{:02x} ", b)),
                None => out.push_str("   "),
            }
        }
        out.push('|');
        for b in chunk {
            let c = *b as char;
            out.push(if c.is_ascii_graphic() || c == ' ' { c } else { '.' });
        }
        out.push('|');
        out.push('\n');
    }
    out
}
