//! Frame traffic recording and hex formatting.

use std::fmt::Write as _;

use bytes::Bytes;

/// Which way a frame travelled, seen from the harness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Harness to session.
    Outbound,
    /// Session to harness.
    Inbound,
}

impl Direction {
    /// Marker used in hexdumps: `<` for emitted frames, `>` for received ones.
    pub fn marker(self) -> char {
        match self {
            Direction::Outbound => '<',
            Direction::Inbound => '>',
        }
    }
}

/// One frame on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Exchange {
    /// Script position the frame was matched against.
    pub position: usize,
    pub direction: Direction,
    pub frame: Bytes,
}

/// Everything that crossed the channel during a run, in order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Trace {
    entries: Vec<Exchange>,
}

impl Trace {
    pub fn record(&mut self, position: usize, direction: Direction, frame: Bytes) {
        if tracing::enabled!(tracing::Level::DEBUG) {
            for line in hexdump(&frame).lines() {
                tracing::debug!("{} {}", direction.marker(), line);
            }
        }
        self.entries.push(Exchange {
            position,
            direction,
            frame,
        });
    }

    pub fn entries(&self) -> &[Exchange] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn format_hex_dump(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            let _ = writeln!(
                out,
                "\n[{} frame {}] {} bytes:",
                entry.direction.marker(),
                entry.position,
                entry.frame.len()
            );
            out.push_str(&hexdump(&entry.frame));
        }
        out
    }
}

/// Bytes as space-separated hex pairs.
pub fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

/// Offset, hex and ASCII columns, 16 bytes per line.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for (i, chunk) in data.chunks(16).enumerate() {
        let _ = write!(out, "{:08x}  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            let _ = write!(out, "{:02x} ", byte);
            if j == 7 {
                out.push(' ');
            }
        }

        // Pad short lines so the ASCII column lines up.
        for j in chunk.len()..16 {
            out.push_str("   ");
            if j == 7 {
                out.push(' ');
            }
        }

        out.push_str(" |");
        for &byte in chunk {
            if (0x20..0x7f).contains(&byte) {
                out.push(byte as char);
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");
    }
    out
}
