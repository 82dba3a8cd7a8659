use manuerp_core::Aggregate;

/// Decide and evolve in one step, without persistence.
///
/// Calls `handle` and folds every produced event back into `aggregate`.
/// Domain tests use this to drive an aggregate through a history; production
/// writes go through the infra dispatcher so they are persisted under an
/// optimistic version check.
pub fn execute<A>(aggregate: &mut A, command: &A::Command) -> Result<Vec<A::Event>, A::Error>
where
    A: Aggregate,
{
    let events = aggregate.handle(command)?;
    for ev in &events {
        aggregate.apply(ev);
    }
    Ok(events)
}
