use crate::core::context::ExecutionContext;

/// One compiled method entry point.
///
/// An implementation must leave exactly one legal outcome in the context's
/// handling slot before returning. Closures of the right shape implement this
/// trait, which is how loaders and tests usually provide them.
pub trait MethodFn: Send + Sync + 'static {
    fn call(&self, ctx: &mut ExecutionContext<'_>);
}

impl<F> MethodFn for F
where
    F: Fn(&mut ExecutionContext<'_>) + Send + Sync + 'static,
{
    fn call(&self, ctx: &mut ExecutionContext<'_>) {
        self(ctx)
    }
}
