const ROW: usize = 16;

/// Render `data` as rows of 16 bytes, each prefixed with its byte address on the card.
pub fn format_block(base: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(ROW).enumerate() {
        let addr = base + (row * ROW) as u64;
        out.push_str(&format!("{addr:08x} "));
        for i in 0..ROW {
            match chunk.get(i) {
                Some(b) => out.push_str(&format!(" {b:02x}")),
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
