use distributed_ranges::sharding::Distribution;
use distributed_ranges::{Runtime, ThreadGroup};

/// Runs `f` on every rank of a run with `ranks` ranks of `devices` devices.
///
/// A single rank is built directly, several ranks run as a thread group.
pub fn on_every_rank<R, F>(ranks: usize, devices: usize, distribution: Distribution, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(Runtime) -> R + Sync,
{
    let builder = Runtime::builder()
        .devices(devices)
        .threads_per_device(2)
        .distribution(distribution);

    if ranks == 1 {
        vec![f(builder.build().unwrap())]
    } else {
        ThreadGroup::new(ranks).run(&builder, f).unwrap()
    }
}
