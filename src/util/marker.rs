use std::marker::PhantomData;

#[allow(dead_code)]
pub(crate) type PhantomUnsync = PhantomData<std::cell::Cell<()>>;
//Holders must be dropped on the thread that created them.
pub(crate) type PhantomUnsend = PhantomData<std::sync::MutexGuard<'static, ()>>;
