//! Data Link Escape shielding used by voice modems to embed control events
//! inside a raw audio byte stream.
//!
//! Modem to host: `<DLE><DLE>` is a literal 0x10 sample, `<DLE>x` is an event.
//! Host to modem: every 0x10 sample must be doubled before transmission.

pub const DLE: u8 = 0x10;
pub const ETX: u8 = 0x03;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DleEvent {
    /// `<DLE><ETX>`, the modem finished its voice data.
    EndOfData,
    /// `<DLE>H`, or `<DLE>P` on Conexant chipsets.
    LocalOffHook,
    /// `<DLE>h`
    LocalOnHook,
    /// `<DLE>b`
    BusyTone,
    /// `<DLE>d`
    DialTone,
    /// `<DLE>s`, or `<DLE>q` on Conexant chipsets.
    Silence,
    /// `<DLE>R`
    Ring,
    /// `<DLE>` followed by 0-9, *, # or A-D.
    Dtmf(char),
    /// Anything else, e.g. answer tone or buffer underrun reports.
    Other(u8)
}
impl DleEvent {
    pub fn from_code(code: u8) -> Self {
        match code {
            ETX => DleEvent::EndOfData,
            b'H' | b'P' => DleEvent::LocalOffHook,
            b'h' => DleEvent::LocalOnHook,
            b'b' => DleEvent::BusyTone,
            b'd' => DleEvent::DialTone,
            b's' | b'q' => DleEvent::Silence,
            b'R' => DleEvent::Ring,
            b'0'..=b'9' | b'*' | b'#' | b'A'..=b'D' => DleEvent::Dtmf(code as char),
            other => DleEvent::Other(other)
        }
    }
}

/// Splits a chunk of received voice data into samples and in-band events.
/// Keeps state between chunks so a DLE split across two reads is still paired.
#[derive(Debug, Default)]
pub struct DleDecoder {
    pending_dle: bool
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedChunk {
    pub samples: Vec<u8>,

    /// Events with the sample offset at which they occurred.
    pub events: Vec<(usize, DleEvent)>
}
impl DecodedChunk {
    pub fn first_event(&self) -> Option<DleEvent> {
        self.events.first().map(|(_, event)| *event)
    }
}

impl DleDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, chunk: &[u8]) -> DecodedChunk {
        let mut decoded = DecodedChunk {
            samples: Vec::with_capacity(chunk.len()),
            events: Vec::new()
        };

        for &byte in chunk {
            if self.pending_dle {
                self.pending_dle = false;
                if byte == DLE {
                    decoded.samples.push(DLE);
                } else {
                    decoded.events.push((decoded.samples.len(), DleEvent::from_code(byte)));
                }
            } else if byte == DLE {
                self.pending_dle = true;
            } else {
                decoded.samples.push(byte);
            }
        }

        decoded
    }
}

/// Doubles every DLE byte so outgoing samples are not read as commands.
pub fn escape(samples: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(samples.len() + samples.len() / 64);
    for &byte in samples {
        escaped.push(byte);
        if byte == DLE {
            escaped.push(DLE);
        }
    }
    escaped
}
