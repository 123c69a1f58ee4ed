/// Mark a branch as cold, e.g. an allocation-failure path.
#[cold]
pub fn cold<R, F: Fn() -> R>(f: F) -> R {
    f()
}
