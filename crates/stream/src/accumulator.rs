//! Where reconstructed text goes.

use crate::pipeline::StreamOutcome;

/// Receiver of reconstructed delta text, owned by whoever renders it.
///
/// The pipeline never keeps text of its own; it pushes every delta here in
/// arrival order.
pub trait DeltaSink {
    fn on_delta(&mut self, text: &str);

    /// Called when a new request starts on this sink.
    fn reset(&mut self) {}

    /// Called once with the terminal outcome of the request.
    fn on_finish(&mut self, _outcome: &StreamOutcome) {}
}

/// Append-only result text for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultBuffer {
    text: String,
}

impl ResultBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl DeltaSink for ResultBuffer {
    fn on_delta(&mut self, text: &str) {
        self.text.push_str(text);
    }

    fn reset(&mut self) {
        self.text.clear();
    }
}

impl<S: DeltaSink + ?Sized> DeltaSink for &mut S {
    fn on_delta(&mut self, text: &str) {
        (**self).on_delta(text)
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn on_finish(&mut self, outcome: &StreamOutcome) {
        (**self).on_finish(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_in_order_and_resets() {
        let mut buf = ResultBuffer::new();
        buf.on_delta("Hel");
        buf.on_delta("lo");
        assert_eq!(buf.as_str(), "Hello");
        assert_eq!(buf.len(), 5);
        buf.reset();
        assert!(buf.is_empty());
    }
}
