//! Shared fixtures for the integration tests: a counter effect whose
//! interpreter supports snapshot/restore and forking, and a side-effect log.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;

use effweave_core::{erase, Eff, Effect, EffectKey, Handler, HandlerCx, Request, Unwind, Value};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub enum Counter {
    Get,
    Add(i64),
}

impl Effect for Counter {}

pub fn get() -> Eff<i64> {
    Eff::send(Counter::Get)
}

pub fn add(n: i64) -> Eff<()> {
    Eff::send(Counter::Add(n))
}

struct CounterHandler {
    value: Mutex<i64>,
}

impl Handler for CounterHandler {
    fn handle(&self, request: Request, _cx: &HandlerCx<'_>) -> Result<Value, Unwind> {
        match request.into_op::<Counter>()? {
            Counter::Get => Ok(erase(*self.value.lock())),
            Counter::Add(n) => {
                *self.value.lock() += n;
                Ok(erase(()))
            }
        }
    }

    fn fork(&self) -> Option<Arc<dyn Handler>> {
        Some(Arc::new(CounterHandler {
            value: Mutex::new(*self.value.lock()),
        }))
    }

    fn snapshot(&self) -> Option<Value> {
        Some(erase(*self.value.lock()))
    }

    fn restore(&self, saved: Value) {
        if let Ok(value) = saved.downcast::<i64>() {
            *self.value.lock() = *value;
        }
    }
}

/// Interpret `Counter` starting from `initial`; returns the final count with
/// the body's result.
pub fn run_counter<A: Send + 'static>(initial: i64, body: Eff<A>) -> Eff<(i64, A)> {
    let handler = Arc::new(CounterHandler {
        value: Mutex::new(initial),
    });
    let state = Arc::clone(&handler);
    body.handle_with_shared(EffectKey::of::<Counter>(), handler, move |end| {
        let result = end.resolve()?;
        let count = *state.value.lock();
        Ok((count, result))
    })
}

#[derive(Clone, Default)]
pub struct SideEffects(Arc<Mutex<Vec<String>>>);

impl SideEffects {
    pub fn record(&self, line: impl Into<String>) -> Eff<()> {
        let log = Arc::clone(&self.0);
        let line = line.into();
        Eff::embed(move || log.lock().push(line))
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}
