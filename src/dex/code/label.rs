use std::fmt;

/// Opaque handle to a relocatable position in a [`super::MutableInstructionStream`]
///
/// Labels are only meaningful for the stream that created them. A label is either unplaced or
/// bound to exactly one location; removing the instruction at that location moves the label to
/// the following location.
#[derive(Copy, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Label(pub(super) usize);

impl fmt::Debug for Label {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_fmt(format_args!("l{}", self.0))
    }
}
