//! The imprecision warning channel.
//!
//! Domains report precision losses (non-constant array index, overlapping
//! cells, oversized initialisation) as warnings, not errors: the operation is
//! conservatively dropped and the analysis continues. The sink is a
//! caller-provided callback rather than a global logger so embedders can
//! collect, count, or silence the messages per analysis.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Clonable handle to a warning callback. The default forwards to
/// `tracing::warn!`.
#[derive(Clone)]
pub struct WarningSink {
    inner: Rc<dyn Fn(&str)>,
}

impl WarningSink {
    pub fn new(f: impl Fn(&str) + 'static) -> Self {
        WarningSink { inner: Rc::new(f) }
    }

    /// A sink that appends every message to a shared buffer. Handy in tests.
    pub fn collecting() -> (Self, Rc<RefCell<Vec<String>>>) {
        let buf: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink_buf = Rc::clone(&buf);
        (
            WarningSink::new(move |msg| sink_buf.borrow_mut().push(msg.to_string())),
            buf,
        )
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        (self.inner)(msg.as_ref());
    }
}

impl Default for WarningSink {
    fn default() -> Self {
        WarningSink::new(|msg| tracing::warn!(target: "octant", "{msg}"))
    }
}

impl fmt::Debug for WarningSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WarningSink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_sink_records_messages() {
        let (sink, buf) = WarningSink::collecting();
        sink.warn("lost precision");
        let cloned = sink.clone();
        cloned.warn("again");
        assert_eq!(buf.borrow().as_slice(), ["lost precision", "again"]);
    }
}
