//! Tagged effects: several independent instances of one effect.
//!
//! `Tagged<K, E>` carries an operation of `E` but is routed by its own key,
//! so interpreters of `E` never see it. The tag `K` is any `'static` type
//! and exists only at the type level.
//!
//! Routing is the only behaviour. After [`untag`], requests that were tagged
//! join the plain `E` requests and go to the same interpreter.

use std::marker::PhantomData;

use effweave_core::{Eff, Effect};

pub struct Tagged<K, E> {
    op: E,
    _tag: PhantomData<fn() -> K>,
}

impl<K: 'static, E: Effect> Effect for Tagged<K, E> {}

impl<K, E> Tagged<K, E> {
    pub fn new(op: E) -> Self {
        Tagged {
            op,
            _tag: PhantomData,
        }
    }

    pub fn into_inner(self) -> E {
        self.op
    }
}

/// Send an operation of `E` to the interpreter of `Tagged<K, E>`.
pub fn send_tagged<K: 'static, E: Effect, A: Send + 'static>(op: E) -> Eff<A> {
    Eff::send(Tagged::<K, E>::new(op))
}

/// Rewrite the `E` requests of `body` into `Tagged<K, E>` requests.
pub fn tagged<K: 'static, E: Effect, A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.reinterpret(|op: E| Tagged::<K, E>::new(op))
}

/// Send the `E` requests of `body` to the interpreter of `Tagged<K, E>`
/// installed around it.
pub fn tag<K: 'static, E: Effect, A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    tagged::<K, E, A>(body)
}

/// Turn the `Tagged<K, E>` requests of `body` back into plain `E` requests.
pub fn untag<K: 'static, E: Effect, A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.reinterpret(|tagged: Tagged<K, E>| tagged.into_inner())
}

/// Move the `Tagged<K1, E>` requests of `body` to the `K2` instance.
pub fn retag<K1: 'static, K2: 'static, E: Effect, A: Send + 'static>(body: Eff<A>) -> Eff<A> {
    body.reinterpret(|tagged: Tagged<K1, E>| Tagged::<K2, E>::new(tagged.into_inner()))
}
