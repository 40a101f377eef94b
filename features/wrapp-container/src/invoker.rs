use crate::{
    errors::Error,
    resolver::{Inject, Resolver, Scope},
    types::Service,
};

/// Calls arbitrary functions with resolved arguments
#[derive(Clone, Debug)]
pub struct Invoker {
    resolver: Resolver,
}
impl Service for Invoker {}

impl Invoker {
    pub(crate) fn new(resolver: Resolver) -> Self {
        Invoker { resolver }
    }

    /// Resolves every parameter of `f` and calls it.
    ///
    /// Fails if an argument can not be resolved, the result of `f` itself is returned as is.
    pub fn invoke<Args, F: Invocable<Args>>(&self, f: F) -> Result<InvokeResult<F::Output>, Error> {
        self.resolver
            .with_scope(|scope| f.invoke(scope))
            .map(InvokeResult::new)
    }
}

/// A function which can be called by the [`Invoker`]
pub trait Invocable<Args> {
    type Output;

    fn invoke(self, scope: &Scope<'_>) -> Result<Self::Output, Error>;
}

macro_rules! impl_invocable {
    ($($arg:ident),*) => {
        impl<Func, Out, $($arg,)*> Invocable<($($arg,)*)> for Func
        where
            Func: FnOnce($($arg),*) -> Out,
            $($arg: Inject,)*
        {
            type Output = Out;

            #[allow(non_snake_case, unused_mut, unused_variables, unused_assignments)]
            fn invoke(self, scope: &Scope<'_>) -> Result<Out, Error> {
                let mut index = 0;
                $(
                    let $arg = scope.argument::<$arg>(index)?;
                    index += 1;
                )*
                Ok((self)($($arg),*))
            }
        }
    };
}
impl_invocable!();
impl_invocable!(A1);
impl_invocable!(A1, A2);
impl_invocable!(A1, A2, A3);
impl_invocable!(A1, A2, A3, A4);
impl_invocable!(A1, A2, A3, A4, A5);
impl_invocable!(A1, A2, A3, A4, A5, A6);
impl_invocable!(A1, A2, A3, A4, A5, A6, A7);
impl_invocable!(A1, A2, A3, A4, A5, A6, A7, A8);

/// Whatever the invoked function returned
#[derive(Debug, Clone, PartialEq)]
pub struct InvokeResult<T> {
    value: T,
}
impl<T> InvokeResult<T> {
    fn new(value: T) -> Self {
        InvokeResult { value }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }
}
impl<T, E> InvokeResult<Result<T, E>> {
    /// The error returned by the function, if any
    pub fn error(&self) -> Option<&E> {
        self.value.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.value
    }
}
