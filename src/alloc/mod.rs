pub mod block;
pub mod header;
pub mod names;
pub mod registry;
pub mod tracing;

/// What releasing a null pointer does.
///
/// [`Fault`](NullRelease::Fault) raises a catchable panic rather than
/// silently discarding the release. It is the stricter mode, and the
/// fragile one: plenty of correct code frees null on purpose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NullRelease {
    /// Silently do nothing.
    #[default]
    Ignore,
    /// Panic. Catchable with `std::panic::catch_unwind`.
    Fault,
}
