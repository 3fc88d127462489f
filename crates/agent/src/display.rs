//! Live display gating for a streamed turn.
//!
//! Deltas pass through a [`DisplayGate`] before reaching the user. The gate
//! starts `Undecided` while the reply could still open with a tool block,
//! then commits to `Visible` (stream deltas as they come) or `Suppressed`
//! (the model is writing a tool call; keep accumulating silently).
//!
//! In the visible phase any trailing text that could be the beginning of
//! the marker is held back until the next delta resolves it, so raw
//! tool-call syntax never reaches the display.

use crate::extract::TOOL_BLOCK_MARKER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Undecided,
    Visible,
    Suppressed,
}

#[derive(Debug)]
pub struct DisplayGate {
    phase: Phase,
    text: String,
    /// Byte offset into `text` up to which output has been released.
    shown: usize,
}

impl DisplayGate {
    pub fn new() -> Self {
        Self {
            phase: Phase::Undecided,
            text: String::new(),
            shown: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Everything received so far, displayed or not.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Feed one delta; returns the text that may be displayed now.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        self.text.push_str(delta);

        if self.phase == Phase::Suppressed {
            return None;
        }

        if let Some(idx) = self.text[self.shown..].find(TOOL_BLOCK_MARKER) {
            let start = self.shown + idx;
            let narration = self.release(start);
            self.phase = Phase::Suppressed;
            return narration.filter(|n| !n.trim().is_empty());
        }

        if self.phase == Phase::Undecided {
            if TOOL_BLOCK_MARKER.starts_with(self.text.trim_start()) {
                return None;
            }
            self.phase = Phase::Visible;
        }

        let held = self.marker_prefix_suffix();
        self.release(self.text.len() - held)
    }

    /// End of turn: release whatever was held back, unless suppressed.
    pub fn finish(&mut self) -> Option<String> {
        match self.phase {
            Phase::Suppressed => None,
            Phase::Undecided | Phase::Visible => {
                let end = self.text.len();
                self.release(end).filter(|rest| !rest.trim().is_empty())
            }
        }
    }

    /// Consume the gate, returning the full text and, when display was
    /// suppressed, the tail that was never shown.
    pub fn into_parts(self) -> (String, Option<String>) {
        let hidden = (self.phase == Phase::Suppressed).then(|| self.text[self.shown..].to_string());
        (self.text, hidden)
    }

    fn release(&mut self, end: usize) -> Option<String> {
        if end <= self.shown {
            return None;
        }
        let out = self.text[self.shown..end].to_string();
        self.shown = end;
        Some(out)
    }

    /// Length of the longest unreleased suffix that is a proper prefix of the marker.
    fn marker_prefix_suffix(&self) -> usize {
        let pending = self.text.len() - self.shown;
        let longest = pending.min(TOOL_BLOCK_MARKER.len() - 1);
        (1..=longest)
            .rev()
            .find(|&k| {
                let start = self.text.len() - k;
                self.text.is_char_boundary(start) && TOOL_BLOCK_MARKER.starts_with(&self.text[start..])
            })
            .unwrap_or(0)
    }
}

impl Default for DisplayGate {
    fn default() -> Self {
        Self::new()
    }
}
