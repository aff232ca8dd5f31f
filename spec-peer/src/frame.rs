//! Frame scripts.
//!
//! A script is the exact, ordered wire exchange of one scenario. Position in
//! the script is the only synchronization there is: the engine never looks
//! inside a frame beyond its signal identifier.

use avdtp_spec_proto::signal::signal_id_of;
use bytes::Bytes;

use crate::error::HarnessError;

/// One scripted frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Bytes),
    /// End of script. Never carries data.
    End,
}

static END: Frame = Frame::End;

impl Frame {
    pub fn is_end(&self) -> bool {
        matches!(self, Frame::End)
    }

    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Frame::Data(data) => Some(data),
            Frame::End => None,
        }
    }

    /// Signal identifier of a data frame at least two bytes long.
    pub fn signal_id(&self) -> Option<u8> {
        self.data().and_then(|data| signal_id_of(data))
    }
}

/// An immutable, End-terminated sequence of frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Script {
    frames: Vec<Frame>,
}

impl Script {
    /// Build a script from its data frames, appending the two End markers.
    pub fn new<I>(frames: I) -> Result<Self, HarnessError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut script: Vec<Frame> = Vec::new();
        for (position, data) in frames.into_iter().enumerate() {
            if data.is_empty() {
                return Err(HarnessError::MalformedScript(format!(
                    "frame {} is empty",
                    position
                )));
            }
            script.push(Frame::Data(data));
        }

        if script.is_empty() {
            return Err(HarnessError::MalformedScript(
                "script has no frames".to_string(),
            ));
        }

        script.push(Frame::End);
        script.push(Frame::End);
        Ok(Self { frames: script })
    }

    pub fn from_static(frames: &'static [&'static [u8]]) -> Result<Self, HarnessError> {
        Self::new(frames.iter().map(|frame| Bytes::from_static(*frame)))
    }

    /// Frame at `cursor`; End for any position past the data frames.
    pub fn next(&self, cursor: usize) -> &Frame {
        self.frames.get(cursor).unwrap_or(&END)
    }

    /// Number of data frames.
    pub fn len(&self) -> usize {
        self.frames.iter().take_while(|f| !f.is_end()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
