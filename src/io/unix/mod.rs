mod sync;

pub(super) use sync::lock;
